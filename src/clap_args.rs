use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Command line used to start the target server, e.g. "./game_server -c config.json"
    pub server: String,

    /// Path to a fusillade.toml config file
    #[arg(short, long, default_value = "./fusillade.toml")]
    pub config: String,

    /// Verbose mode (-v, --verbose)
    #[arg(short, long)]
    pub verbose: bool,
}

pub fn parse() -> Args {
    Args::parse()
}
