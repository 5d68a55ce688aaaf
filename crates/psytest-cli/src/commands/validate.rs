//! The `psytest validate` command.

use std::path::PathBuf;

use anyhow::Result;

use psytest_core::content::ContentModel;
use psytest_core::validation::validate_content;

pub fn execute(bundle_path: PathBuf) -> Result<()> {
    let bundles = psytest_core::parser::load_bundles(&bundle_path)?;
    if bundles.is_empty() {
        anyhow::bail!("no bundles found in {}", bundle_path.display());
    }

    let mut warnings = 0;
    let mut defects = 0;
    let mut unloadable = 0;

    for (path, bundle) in bundles {
        println!(
            "Test: {} ({} blocks, {} questions) [{}]",
            bundle.test.title,
            bundle.blocks.len(),
            bundle.questions.len(),
            path.display()
        );

        let model = match ContentModel::from_bundle(bundle) {
            Ok(model) => model,
            Err(e) => {
                println!("  ERROR: {e}");
                unloadable += 1;
                continue;
            }
        };

        for issue in validate_content(&model) {
            println!("  {issue}");
            if issue.is_defect() {
                defects += 1;
            } else {
                warnings += 1;
            }
        }
    }

    if warnings + defects + unloadable == 0 {
        println!("All bundles valid.");
        return Ok(());
    }

    println!("\n{defects} defect(s), {warnings} warning(s) found.");
    if unloadable > 0 || defects > 0 {
        anyhow::bail!("{unloadable} unloadable bundle(s), {defects} defect(s)");
    }
    Ok(())
}
