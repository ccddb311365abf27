use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Sugoi Translator install folder, overrides the configuration file
    #[arg(long)]
    pub install_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Translate Japanese text to English
    Translate {
        /// Text to translate
        text: String,

        /// Additional texts sent in the same batch (managed server only)
        #[arg(short, long)]
        batch: Vec<String>,
    },

    /// Inspect the Sugoi installation without starting the server
    Resolve,

    /// Write the default configuration file
    InitConfig {
        /// Output file
        #[arg(short, long, default_value = "sugoi-bridge.toml")]
        output: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_translate_with_batch() {
        let args = Args::parse_from([
            "sugoi-bridge",
            "--install-path",
            "C:/Sugoi",
            "translate",
            "こんにちは",
            "--batch",
            "ありがとう",
            "--batch",
            "さようなら",
        ]);

        assert_eq!(args.install_path, Some(PathBuf::from("C:/Sugoi")));
        match args.command {
            Commands::Translate { text, batch } => {
                assert_eq!(text, "こんにちは");
                assert_eq!(batch, vec!["ありがとう", "さようなら"]);
            }
            _ => panic!("expected translate command"),
        }
    }

    #[test]
    fn test_init_config_default_output() {
        let args = Args::parse_from(["sugoi-bridge", "init-config"]);
        match args.command {
            Commands::InitConfig { output } => assert_eq!(output, PathBuf::from("sugoi-bridge.toml")),
            _ => panic!("expected init-config command"),
        }
    }
}
