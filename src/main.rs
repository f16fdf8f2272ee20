use attendance_console_lib::console::Args;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    attendance_console_lib::run(Args::parse()).await
}
