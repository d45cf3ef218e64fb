//! `check-config` command

use clap::Args;
use colored::Colorize;
use realtime_pipeline_config::PipelineConfig;

#[derive(Args, Debug, Clone)]
pub struct CheckConfigArgs {
    /// Print the effective configuration as JSON
    #[arg(long)]
    pub show: bool,
}

pub fn check_config(config: &PipelineConfig, args: &CheckConfigArgs) -> anyhow::Result<()> {
    config.validate()?;

    println!("{} configuration is valid", "✓".green().bold());
    println!();
    println!("  {:<24} {}", "service".bold(), config.service.name);
    println!(
        "  {:<24} batch_size={} window={}ms strategy={}",
        "stream defaults".bold(),
        config.stream_defaults.batch_size,
        config.stream_defaults.window_size_ms,
        config.stream_defaults.backpressure_strategy.name()
    );
    println!(
        "  {:<24} default_batch_size={}",
        "batch".bold(),
        config.batch.default_batch_size
    );
    println!("  {:<24} {}", "inference".bold(), config.inference.base_url);
    println!("  {:<24}", "default alert rules".bold());
    for rule in &config.alerting.default_rules {
        println!(
            "    {} {} {} {} ({})",
            rule.id.cyan(),
            rule.condition.metric,
            rule.condition.operator.symbol(),
            rule.condition.threshold,
            rule.severity.name()
        );
    }

    if args.show {
        println!();
        println!("{}", serde_json::to_string_pretty(config)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_passes() {
        let config = PipelineConfig::default();
        assert!(check_config(&config, &CheckConfigArgs { show: false }).is_ok());
    }

    #[test]
    fn test_invalid_file_config_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "stream_defaults:\n  batch_size: 0").unwrap();

        let config = PipelineConfig::load(Some(file.path().to_path_buf())).unwrap();
        assert!(check_config(&config, &CheckConfigArgs { show: true }).is_err());
    }
}
