use std::error::Error;

use clap::Parser;

use barrage::args::ServerArgs;
use barrage::{init_logging, server};

fn main() -> Result<(), Box<dyn Error>> {
    let args = ServerArgs::parse();

    init_logging(args.verbose);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move { server::run(args.listen).await })?;
    Ok(())
}
