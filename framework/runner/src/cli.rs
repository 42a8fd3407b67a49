use std::time::Duration;

use clap::Parser;
use gale_instruments::Threshold;

use crate::schedule::Stage;

#[derive(Parser, Debug, Clone)]
#[command(about, long_about = None)]
pub struct GaleScenarioCli {
    /// Base URL of the service to test
    #[clap(
        short,
        long,
        env = "BASE_URL",
        default_value = "http://localhost:8080"
    )]
    pub connection_string: String,

    /// A load stage in the format `duration:target`. For example `--stage=30s:5` ramps to 5
    /// concurrent callers over 30 seconds.
    ///
    /// Durations accept `ms`, `s`, `m` and `h` units, which may be combined as in `1m30s`. A bare
    /// number is read as seconds.
    ///
    /// Use the flag multiple times to build up a schedule. When given, these stages replace the
    /// scenario's default stages entirely.
    #[clap(long, value_parser = parse_stage)]
    pub stage: Vec<Stage>,

    /// An extra pass/fail threshold in the format `metric=expression`. For example
    /// `--threshold='http_req_duration=p(90)<200'`.
    ///
    /// Thresholds given here are added to the scenario's defaults.
    #[clap(long, value_parser = parse_threshold)]
    pub threshold: Vec<Threshold>,

    /// Do not show a progress bar on the CLI.
    ///
    /// This is recommended for CI/CD environments where the progress bar isn't being looked at by anyone and is just adding noise to the logs.
    #[clap(long, default_value = "false")]
    pub no_progress: bool,

    /// Identifier for this run, used to name the fixtures created on the service.
    ///
    /// Defaults to the current time in milliseconds followed by a random suffix.
    #[clap(long)]
    pub run_id: Option<String>,
}

fn parse_stage(s: &str) -> anyhow::Result<Stage> {
    let (duration, target) = s
        .rsplit_once(':')
        .ok_or_else(|| anyhow::anyhow!("Expected `duration:target`, got `{s}`"))?;

    let duration = parse_duration(duration)?;
    let target = target
        .trim()
        .parse::<usize>()
        .map_err(|e| anyhow::anyhow!("Invalid target `{target}`: {e}"))?;

    Ok(Stage::new(duration, target))
}

fn parse_threshold(s: &str) -> anyhow::Result<Threshold> {
    Ok(s.parse::<Threshold>()?)
}

/// Parse a duration like `500ms`, `30s`, `2m`, `1h` or `1m30s`. A bare number is seconds.
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("Empty duration");
    }

    if let Ok(seconds) = s.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| anyhow::anyhow!("Missing unit at the end of `{s}`"))?;
        if digits_end == 0 {
            anyhow::bail!("Expected a number in `{s}`");
        }
        let value = rest[..digits_end].parse::<u64>()?;
        rest = &rest[digits_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let unit = &rest[..unit_end];
        rest = &rest[unit_end..];

        total += match unit {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 3600),
            other => anyhow::bail!("Unknown duration unit `{other}` in `{s}`"),
        };
    }

    Ok(total)
}
