//! The `psytest norms` command.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, Table};

use psytest_core::content::ContentModel;
use psytest_core::norms::{calibrate, calibrate_all, round1, NormStyle, TheoreticalNorm};

pub fn execute(bundle_path: PathBuf, scale: Option<u64>, format: String) -> Result<()> {
    let model = super::load_model(&bundle_path)?;

    let results = match scale {
        Some(scale_id) => vec![(scale_id, calibrate(&model, scale_id))],
        None => calibrate_all(&model).into_iter().collect(),
    };

    let mut norms = Vec::new();
    for (scale_id, result) in results {
        match result {
            Ok(norm) => norms.push(norm),
            // A single requested scale that cannot be calibrated is an error.
            Err(e) if scale.is_some() => return Err(e.into()),
            Err(e) => eprintln!("  skipping scale {scale_id}: {e}"),
        }
    }

    match format.as_str() {
        "json" => {
            let rows = norms.iter().map(json_row).collect::<Result<Vec<_>>>()?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        _ => print_table(&model, &norms),
    }

    for norm in norms.iter().filter(|n| n.suspect) {
        eprintln!(
            "warning: scale {} has authoring defects, its norm may be wrong",
            norm.scale_id
        );
    }
    Ok(())
}

/// The stored norm plus its calibrated range and the suspect flag.
fn json_row(norm: &TheoreticalNorm) -> Result<serde_json::Value> {
    let mut row = serde_json::to_value(norm.to_norm())?;
    if let Some(fields) = row.as_object_mut() {
        fields.insert("min".into(), round1(norm.min).into());
        fields.insert("max".into(), round1(norm.max).into());
        fields.insert("suspect".into(), norm.suspect.into());
    }
    Ok(row)
}

fn print_table(model: &ContentModel, norms: &[TheoreticalNorm]) {
    let mut table = Table::new();
    table.set_header(vec!["Scale", "Name", "Style", "Min", "Max", "Mean", "Std dev"]);

    for norm in norms {
        let name = model
            .scale(norm.scale_id)
            .map(|s| match &s.pole2 {
                Some(pole2) => format!("{} / {}", s.pole1, pole2),
                None => s.pole1.clone(),
            })
            .unwrap_or_default();
        let style = match norm.style {
            NormStyle::Sum => "sum",
            NormStyle::Gradual => "gradual",
        };
        table.add_row(vec![
            Cell::new(norm.scale_id),
            Cell::new(name),
            Cell::new(style),
            Cell::new(round1(norm.min)),
            Cell::new(round1(norm.max)),
            Cell::new(round1(norm.mean)),
            Cell::new(round1(norm.std_dev)),
        ]);
    }

    println!("{table}");
}
