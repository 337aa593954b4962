use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "conclave-server", about = "Conclave group session server")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/conclave.toml")]
    pub config: String,
}
