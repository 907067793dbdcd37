use clap::Parser;

/// The sandkube gateway's command line args
#[derive(Parser, Debug, Clone)]
#[clap(version, author)]
pub struct Args {
    /// The path to load the config file from
    #[clap(short, long, default_value = "sandkube.yml")]
    pub config: String,
}
