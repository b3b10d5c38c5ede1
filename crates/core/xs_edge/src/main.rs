use clap::Parser;
use xs_edge::config::log_init;
use xs_edge::config::EdgeOpt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = EdgeOpt::parse();
    log_init(opt.debug, &opt.log_level);
    xs_edge::run(opt).await
}
