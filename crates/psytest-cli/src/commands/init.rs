//! The `psytest init` command.

use anyhow::Result;

pub fn execute() -> Result<()> {
    if std::path::Path::new("psytest.toml").exists() {
        println!("psytest.toml already exists, skipping.");
    } else {
        std::fs::write("psytest.toml", SAMPLE_CONFIG)?;
        println!("Created psytest.toml");
    }

    std::fs::create_dir_all("bundles")?;
    let example_path = std::path::Path::new("bundles/temperament.toml");
    if example_path.exists() {
        println!("bundles/temperament.toml already exists, skipping.");
    } else {
        std::fs::write(example_path, EXAMPLE_BUNDLE)?;
        println!("Created bundles/temperament.toml");
    }

    println!("\nNext steps:");
    println!("  1. Edit psytest.toml with your server URL and API key");
    println!("  2. Run: psytest validate --bundle bundles/temperament.toml");
    println!("  3. Run: psytest norms --bundle bundles/temperament.toml");

    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# psytest configuration

[server]
base_url = "http://localhost:8080/api/tests"
api_key = "${PSYTEST_API_KEY}"
timeout_secs = 30

[delivery]
# Seconds of countdown per unit of a block's authored time limit.
time_limit_multiplier = 10
grace_period_secs = 10
tick_ms = 1000
load_retries = 2
retry_delay_ms = 500
"#;

const EXAMPLE_BUNDLE: &str = include_str!("../../../../bundles/temperament.toml");
