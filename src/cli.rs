use clap::{Parser, ValueEnum};

/// Top GitHub users by public repositories, per location.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Log output format
    #[arg(long, value_enum, default_value_t = TracingFormat::default())]
    pub tracing: TracingFormat,

    /// Force debug-level logging for this crate (ignored when RUST_LOG is set)
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum TracingFormat {
    /// Human-readable, colored output
    Pretty,
    /// One JSON object per event
    Json,
}

impl Default for TracingFormat {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            TracingFormat::Pretty
        } else {
            TracingFormat::Json
        }
    }
}

impl std::fmt::Display for TracingFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TracingFormat::Pretty => "pretty",
            TracingFormat::Json => "json",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_json_and_verbose() {
        let args = Args::try_parse_from(["ghcontrib", "--tracing", "json", "-v"]).unwrap();
        assert_eq!(args.tracing, TracingFormat::Json);
        assert!(args.verbose);
    }

    #[test]
    fn test_rejects_unknown_format() {
        assert!(Args::try_parse_from(["ghcontrib", "--tracing", "xml"]).is_err());
    }
}
