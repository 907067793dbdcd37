use clap::Parser;
use sandkube_common::Conf;
use sandkube_gateway::Args;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let conf = Conf::new(&args.config).expect("failed to load config");
    sandkube_common::trace::setup("sandkube-gateway", &conf.log_level);
    sandkube_gateway::serve(conf).await;
}
