use super::Parser;

#[derive(Parser, Debug)]
#[command(version, about = "Authentication and session service")]
pub struct Cli {
    /// Path to a settings TOML, overriding the compiled-in default.
    #[arg(long)]
    pub settings: Option<String>,
}
