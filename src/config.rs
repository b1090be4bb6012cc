//! Configuration (§10.3) — a plain struct populated by a thin `clap`
//! CLI layer, with optional per-provider API key environment overrides
//! resolved downstream by the registry/APIService, not here.

use std::path::PathBuf;

use clap::Parser;

/// Recognized options consumed by [`crate::orchestrator::execute`] (§6).
#[derive(Debug, Clone, Parser)]
#[command(name = "llmfan", about = "Fan a prompt out to many LLM backends in parallel and synthesize the results")]
pub struct Config {
    /// Path to the instructions file. Optional only in `--dry-run`.
    #[arg(long)]
    pub instructions_file: Option<PathBuf>,

    /// Output directory. Auto-generated (timestamped) when omitted.
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Requested model ids, in the order they should run.
    #[arg(long = "model", required = true, num_args = 1..)]
    pub model_names: Vec<String>,

    /// Fallback API key; per-provider environment variables take
    /// precedence (see the registry's `get_api_key_env_var`).
    #[arg(long, env = "LLMFAN_API_KEY")]
    pub api_key: Option<String>,

    /// Base-URL override applied to every provider client.
    #[arg(long)]
    pub api_endpoint: Option<String>,

    /// Root paths to gather context files from.
    #[arg(long = "path", num_args = 0..)]
    pub paths: Vec<String>,

    /// Glob-style include filters; empty means include everything not excluded.
    #[arg(long = "include", num_args = 0..)]
    pub include: Vec<String>,

    /// Glob-style exclude filters.
    #[arg(long = "exclude", num_args = 0..)]
    pub exclude: Vec<String>,

    /// Exact file names to exclude regardless of include/exclude globs.
    #[arg(long = "exclude-name", num_args = 0..)]
    pub exclude_names: Vec<String>,

    /// Output file extension/format tag (e.g. "md"), forwarded to the
    /// file gatherer and used to name written artifacts.
    #[arg(long, default_value = "md")]
    pub format: String,

    /// Skip all LLM calls; only report what would run.
    #[arg(long)]
    pub dry_run: bool,

    /// Verbose logging (shorthand for `--log-level debug`).
    #[arg(short, long)]
    pub verbose: bool,

    /// Explicit log level, overriding `RUST_LOG` and `--verbose`.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Global concurrency gate (§5).
    #[arg(long, default_value_t = 4)]
    pub max_concurrent_requests: usize,

    /// Per-provider requests-per-minute gate. `0` disables it.
    #[arg(long, default_value_t = 60)]
    pub rate_limit_requests_per_minute: u32,

    /// Mode bits applied to created directories.
    #[arg(long, default_value_t = 0o755)]
    pub dir_permissions: u32,

    /// Mode bits applied to written artifact files.
    #[arg(long, default_value_t = 0o644)]
    pub file_permissions: u32,

    /// When set, runs the synthesis stage over successful model outputs.
    #[arg(long)]
    pub synthesis_model: Option<String>,

    /// Safety margin percent in `[0, 100]` applied to context windows.
    /// Defaults to the token counting service's own default (10%) when
    /// unset.
    #[arg(long)]
    pub safety_margin_percent: Option<f64>,
}

impl Config {
    /// Parses `Config` from `std::env::args`, then optionally layers a
    /// `serde_yaml` config file over the defaults before flags are
    /// applied on top (flags always win — `clap` has already resolved
    /// them into `self` by the time this runs, so a file value only
    /// fills fields the CLI left at their default).
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::parse();
        if let Some(path) = config_file_path() {
            config.apply_file_overrides(&path)?;
        }
        Ok(config)
    }

    fn apply_file_overrides(&mut self, path: &std::path::Path) -> anyhow::Result<()> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config file {}: {e}", path.display()))?;
        let file: ConfigFile = serde_yaml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("parsing config file {}: {e}", path.display()))?;

        if self.output_dir.is_none() {
            self.output_dir = file.output_dir.map(PathBuf::from);
        }
        if self.api_endpoint.is_none() {
            self.api_endpoint = file.api_endpoint;
        }
        if let Some(margin) = file.safety_margin_percent {
            self.safety_margin_percent.get_or_insert(margin);
        }
        Ok(())
    }

    pub fn resolved_log_level(&self) -> String {
        if let Some(level) = &self.log_level {
            return level.clone();
        }
        if self.verbose {
            return "debug".to_string();
        }
        "info".to_string()
    }

    pub fn resolved_output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(default_output_dir)
    }
}

fn config_file_path() -> Option<PathBuf> {
    std::env::var("LLMFAN_CONFIG_FILE").ok().map(PathBuf::from).filter(|p| p.exists())
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(format!("llmfan-output-{}", chrono::Utc::now().format("%Y%m%d-%H%M%S")))
}

/// Subset of [`Config`] a YAML config file may supply; anything not
/// present here must be passed as a CLI flag.
#[derive(Debug, serde::Deserialize)]
struct ConfigFile {
    output_dir: Option<String>,
    api_endpoint: Option<String>,
    safety_margin_percent: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            instructions_file: None,
            output_dir: None,
            model_names: vec!["gpt-4o".to_string()],
            api_key: None,
            api_endpoint: None,
            paths: vec![],
            include: vec![],
            exclude: vec![],
            exclude_names: vec![],
            format: "md".to_string(),
            dry_run: false,
            verbose: false,
            log_level: None,
            max_concurrent_requests: 4,
            rate_limit_requests_per_minute: 60,
            dir_permissions: 0o755,
            file_permissions: 0o644,
            synthesis_model: None,
            safety_margin_percent: None,
        }
    }

    #[test]
    fn resolved_log_level_prefers_explicit_over_verbose_over_default() {
        let mut c = base_config();
        assert_eq!(c.resolved_log_level(), "info");
        c.verbose = true;
        assert_eq!(c.resolved_log_level(), "debug");
        c.log_level = Some("trace".to_string());
        assert_eq!(c.resolved_log_level(), "trace");
    }

    #[test]
    fn resolved_output_dir_falls_back_to_a_generated_name() {
        let c = base_config();
        let dir = c.resolved_output_dir();
        assert!(dir.to_string_lossy().starts_with("llmfan-output-"));
    }

    #[test]
    fn resolved_output_dir_honors_explicit_value() {
        let mut c = base_config();
        c.output_dir = Some(PathBuf::from("/tmp/explicit"));
        assert_eq!(c.resolved_output_dir(), PathBuf::from("/tmp/explicit"));
    }

    #[test]
    fn file_overrides_do_not_clobber_cli_supplied_values() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("llmfan.yaml");
        std::fs::write(&config_path, "output_dir: /tmp/from-file\napi_endpoint: https://example.test\n").unwrap();

        let mut c = base_config();
        c.api_endpoint = Some("https://cli-wins.test".to_string());
        c.apply_file_overrides(&config_path).unwrap();

        assert_eq!(c.output_dir, Some(PathBuf::from("/tmp/from-file")));
        assert_eq!(c.api_endpoint, Some("https://cli-wins.test".to_string()));
    }
}
