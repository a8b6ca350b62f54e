use clap::Parser;

fn main() -> anyhow::Result<()> {
    let cfg = seedring::config::Config::parse();
    seedring::run(cfg)
}
