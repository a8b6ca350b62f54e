#[derive(clap::Parser, Debug, Clone)]
pub struct Config {
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// Number of simulated devices in the ring (minimum 2).
    #[arg(long, default_value_t = 3)]
    pub devices: usize,
    #[arg(long, default_value = "alice")]
    pub username: String,
    /// Service identifier the OVK is bound to.
    #[arg(long, default_value = "svc.example")]
    pub service: String,
    /// Password protecting the seed-negotiation envelopes.
    #[arg(long, default_value = "out-of-band secret")]
    pub password: String,
    /// Skip the rotation half of the scenario.
    #[arg(long)]
    pub no_rotation: bool,
}
