//! Topogen - Natural Language → Network Topology Code
//!
//! Main CLI entry point for generating and validating topology code.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use topogen::backend::remote::DEFAULT_MODEL;
use topogen::{
    write_candidate, BackendConfig, BackendPreference, Generation, GenerationRequest,
    TopologyGenerator,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "topogen")]
#[command(version)]
#[command(about = "Generate network topology code from natural language", long_about = None)]
struct Cli {
    /// Verbose output (debug-level logs)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate topology code from a description
    Generate {
        /// Natural language description of the desired topology
        description: String,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Use the local model only, no API calls
        #[arg(long)]
        local: bool,

        /// Model name on the inference API
        #[arg(long, default_value = DEFAULT_MODEL)]
        model: String,

        /// API token (or set the HF_TOKEN env var)
        #[arg(long)]
        token: Option<String>,

        /// Path to local model weights
        #[arg(long, default_value = "model.onnx")]
        model_path: PathBuf,

        /// Attempts per backend before falling back
        #[arg(long, default_value = "3")]
        max_attempts: u32,

        /// Per-attempt timeout in seconds
        #[arg(long, default_value = "60")]
        timeout: u64,
    },

    /// Interactive topology generation
    Repl {
        /// Use the local model only, no API calls
        #[arg(long)]
        local: bool,

        /// Model name on the inference API
        #[arg(long, default_value = DEFAULT_MODEL)]
        model: String,

        /// API token (or set the HF_TOKEN env var)
        #[arg(long)]
        token: Option<String>,

        /// Path to local model weights
        #[arg(long, default_value = "model.onnx")]
        model_path: PathBuf,
    },

    /// Show example topology descriptions
    Examples,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Generate {
            description,
            output,
            local,
            model,
            token,
            model_path,
            max_attempts,
            timeout,
        } => cmd_generate(
            &description,
            output.as_deref(),
            local,
            &model,
            token,
            &model_path,
            max_attempts,
            timeout,
        ),
        Commands::Repl {
            local,
            model,
            token,
            model_path,
        } => cmd_repl(local, &model, token, &model_path),
        Commands::Examples => {
            print_examples();
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "topogen=debug" } else { "topogen=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Resolve the backend plan from CLI flags. Without a token the remote
/// backend is unusable, so the plan quietly narrows to local-only.
fn build_generator(
    local: bool,
    token: Option<String>,
    model_path: &Path,
) -> Result<(TopologyGenerator, BackendPreference)> {
    let mut configs = vec![BackendConfig::local(model_path)];

    let preference = if local {
        BackendPreference::Local
    } else {
        match resolve_token(token) {
            Some(token) => {
                configs.push(BackendConfig::remote(token));
                BackendPreference::AutoFallback
            }
            None => {
                eprintln!(
                    "No API token given and HF_TOKEN is not set; using the local model only."
                );
                BackendPreference::Local
            }
        }
    };

    let generator = TopologyGenerator::new(&configs).context("Failed to configure backends")?;
    Ok((generator, preference))
}

fn resolve_token(flag: Option<String>) -> Option<String> {
    flag.or_else(|| std::env::var("HF_TOKEN").ok())
        .filter(|token| !token.trim().is_empty())
}

#[allow(clippy::too_many_arguments)]
fn cmd_generate(
    description: &str,
    output: Option<&Path>,
    local: bool,
    model: &str,
    token: Option<String>,
    model_path: &Path,
    max_attempts: u32,
    timeout: u64,
) -> Result<()> {
    let (generator, preference) = build_generator(local, token, model_path)?;

    let request = GenerationRequest::new(description)
        .with_preference(preference)
        .with_model(model)
        .with_max_attempts(max_attempts)
        .with_timeout(Duration::from_secs(timeout));

    println!("Generating topology...");
    let generation = generator.generate(&request).context("Generation failed")?;

    if let Some(path) = output {
        write_candidate(&generation.code, path)?;
        print!("{}", generation.report.summary());
        println!("Topology generated and saved to: {}", path.display());
    } else {
        print_generation(&generation);
    }

    Ok(())
}

fn cmd_repl(local: bool, model: &str, token: Option<String>, model_path: &Path) -> Result<()> {
    let (generator, preference) = build_generator(local, token, model_path)?;

    println!("LFT AI Topology Generator - Interactive Mode");
    println!("{}", "=".repeat(50));
    println!("Type 'quit' to exit, 'help' for examples, 'clear' to clear screen");
    println!();

    loop {
        let Some(description) = prompt_line("Describe your topology: ")? else {
            println!("\nGoodbye!");
            break;
        };

        match description.to_lowercase().as_str() {
            "quit" | "exit" | "q" => {
                println!("Goodbye!");
                break;
            }
            "help" | "?" => {
                print_examples();
                continue;
            }
            "clear" => {
                print!("\x1b[2J\x1b[1;1H");
                io::stdout().flush()?;
                continue;
            }
            "" => continue,
            _ => {}
        }

        let request = GenerationRequest::new(&description)
            .with_preference(preference)
            .with_model(model);

        println!("Generating topology...");
        let generation = match generator.generate(&request) {
            Ok(generation) => generation,
            Err(e) => {
                eprintln!("Error: {e}");
                println!();
                continue;
            }
        };

        print_generation(&generation);

        let Some(save) = prompt_line("\nSave to file? (y/n): ")? else {
            println!("\nGoodbye!");
            break;
        };
        if matches!(save.to_lowercase().as_str(), "y" | "yes") {
            let Some(filename) =
                prompt_line("Enter filename (default: generated_topology.py): ")?
            else {
                println!("\nGoodbye!");
                break;
            };
            let filename = if filename.is_empty() {
                "generated_topology.py".to_string()
            } else {
                filename
            };
            write_candidate(&generation.code, Path::new(&filename))?;
            println!("Topology saved to: {filename}");
        }
        println!();
    }

    Ok(())
}

fn print_generation(generation: &Generation) {
    println!();
    println!("{}", "=".repeat(50));
    println!("GENERATED TOPOLOGY CODE");
    println!("{}", "=".repeat(50));
    println!("{}", generation.code.source_text);
    println!("{}", "=".repeat(50));
    println!(
        "Backend: {} (attempt {}, {:.1}s, extraction: {})",
        generation.completion.backend_used,
        generation.completion.attempt_count,
        generation.completion.elapsed.as_secs_f64(),
        generation.code.extraction_method
    );
    print!("{}", generation.report.summary());
}

fn print_examples() {
    let examples = [
        (
            "Simple SDN Topology",
            "Create a simple SDN topology with 2 hosts connected to a switch",
        ),
        (
            "4G Wireless Network",
            "Create a 4G wireless network with 2 UEs connected to an eNodeB and EPC",
        ),
        (
            "Multi-Switch SDN",
            "Create an SDN topology with 3 switches, 1 controller, and 4 hosts",
        ),
        (
            "Fog Computing Network",
            "Create a fog computing network with edge nodes, fog nodes, and cloud connection",
        ),
        (
            "Enterprise Network",
            "Create an enterprise network with multiple VLANs, switches, and a gateway",
        ),
        (
            "IoT Network",
            "Create an IoT network with sensors, gateways, and cloud connectivity",
        ),
    ];

    println!("Example Topology Descriptions");
    println!("{}", "=".repeat(50));
    for (i, (title, description)) in examples.iter().enumerate() {
        println!("{}. {}", i + 1, title);
        println!("   {description}");
        println!();
    }
    println!("Usage:");
    println!("  topogen generate \"<description>\" -o output.py");
    println!("  topogen repl");
}

/// Prompt on stdout and read one trimmed line. `None` means EOF.
fn prompt_line(prompt: &str) -> Result<Option<String>> {
    print!("{prompt}");
    io::stdout().flush()?;

    let mut buffer = String::new();
    if io::stdin().read_line(&mut buffer)? == 0 {
        return Ok(None);
    }
    Ok(Some(buffer.trim().to_string()))
}
