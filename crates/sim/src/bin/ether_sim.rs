//! etherwave medium walkthrough

use anyhow::Result;
use colored::Colorize;
use etherwave_sim::{scenarios, SimulationPresets};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    println!("{}", "etherwave virtual RF medium".bright_blue().bold());
    println!("{}", "===========================".bright_blue());

    println!("{}", "\n>>> Point to point: clear day, 500 m, SF7".bright_green().bold());
    scenarios::point_to_point(&SimulationPresets::clear_day(), 0.5).await?;

    println!("{}", "\n>>> Point to point: monsoon, 2 km, SF9".bright_green().bold());
    scenarios::point_to_point(&SimulationPresets::monsoon(), 2.0).await?;

    println!("{}", "\n>>> Point to point: smog behind brick, 1 km, SF8".bright_green().bold());
    scenarios::point_to_point(&SimulationPresets::smoggy_city(), 1.0).await?;

    println!("{}", "\n>>> Broadcast fan-out, SF7".bright_green().bold());
    scenarios::broadcast_fanout(&SimulationPresets::clear_day(), &[0.5, 2.0, 4.5]).await?;

    println!("{}", "\n>>> Range sweep, SF12".bright_green().bold());
    scenarios::range_sweep(&SimulationPresets::long_range(), &[1.0, 5.0, 10.0, 20.0, 24.0], 5)
        .await?;

    println!("{}", "\n>>> Reliable datagram, 1 km".bright_green().bold());
    scenarios::reliable_datagram(1.0).await?;

    println!("{}", "\nAll scenarios complete".bright_yellow());
    Ok(())
}
