use clap::Parser;
use colored::*;
use log::*;

use service::{config::Config, logging::Logger};
use testing_tools::context::TestContext;
use testing_tools::output::{print_step, print_success, print_test_summary, TestResult};
use testing_tools::scenarios::{run_scenario, Scenario, Suite};

#[derive(Parser)]
#[command(name = "mercury_conspector")]
#[command(about = "End-to-end checks for the Mercury GraphQL messaging API")]
struct Cli {
    #[command(flatten)]
    config: Config,

    /// Run a single scenario instead of a whole suite
    #[arg(long, value_enum)]
    scenario: Option<Scenario>,

    /// Suite to run when no scenario is given
    #[arg(long, value_enum, default_value = "all")]
    suite: Suite,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    service::config::load_dotenv();
    let cli = Cli::parse();

    Logger::init_logger(&cli.config)?;
    info!("Starting mercury_conspector");

    println!("{}", "=== SETUP PHASE ===".bright_white().bold());
    print_step("Provisioning synthetic users...");
    let ctx = TestContext::new(&cli.config)?;
    print_success(&format!("User 1: {}", ctx.user1.id));
    print_success(&format!("User 2: {}", ctx.user2.id));
    print_success(&format!(
        "Endpoints: {} and {}",
        ctx.endpoints.graphql_endpoint, ctx.endpoints.ws_endpoint
    ));

    let scenarios = match cli.scenario {
        Some(scenario) => vec![scenario],
        None => cli.suite.scenarios(),
    };

    println!("\n{}", "=== TEST PHASE ===".bright_white().bold());
    let mut results = Vec::with_capacity(scenarios.len());
    for scenario in scenarios {
        results.push(run_scenario(scenario, &ctx).await);
    }

    print_test_summary(&results);

    if !TestResult::all_passed(&results) {
        std::process::exit(1);
    }

    Ok(())
}
