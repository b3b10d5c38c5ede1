use clap::Parser;
use xs_controller::config::log_init;
use xs_controller::config::CtrlOpt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = CtrlOpt::parse();
    log_init(opt.debug, &opt.log_level);
    xs_controller::run(opt).await
}
