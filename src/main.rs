//! jobctl CLI
//!
//! Entry point for the `jobctl` command-line tool.

use std::io::{self, Read};
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use jobctl::inspect::{self, Selector};
use jobctl::{cancel, logging, BackendHandle, BackendRegistry, Submitter};

#[derive(Parser)]
#[command(name = "jobctl")]
#[command(about = "Submit, inspect and cancel jobs on batch backends", version)]
struct Cli {
    /// Path to backend registry (default: ~/.config/jobctl/backends.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Debug logging on stderr
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit the JSON job spec read from stdin and print its id
    Submit {
        /// Backend name from the registry
        backend: String,

        /// Native scheduler arguments (after --), e.g. -- --mem 4G
        #[arg(last = true)]
        native_args: Vec<String>,
    },

    /// Print job status records as a JSON array
    Info {
        /// Backend name from the registry
        backend: String,

        /// Only this job
        #[arg(long, conflicts_with = "owner")]
        id: Option<String>,

        /// Only jobs owned by this user
        #[arg(long)]
        owner: Option<String>,
    },

    /// Cancel a job by id
    Cancel {
        /// Backend name from the registry
        backend: String,

        /// Backend-assigned job id
        id: String,
    },

    /// List configured backends
    Backends {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let registry = match BackendRegistry::load_or_default(cli.config.as_deref()) {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("Error loading backend registry: {}", e);
            process::exit(1);
        }
    };

    match cli.command {
        Commands::Submit {
            backend,
            native_args,
        } => {
            run_submit(&registry, &backend, native_args);
        }
        Commands::Info { backend, id, owner } => {
            run_info(&registry, &backend, id, owner);
        }
        Commands::Cancel { backend, id } => {
            run_cancel(&registry, &backend, &id);
        }
        Commands::Backends { json } => {
            run_backends(&registry, json);
        }
    }
}

fn resolve(registry: &BackendRegistry, name: &str) -> BackendHandle {
    match registry.resolve(name) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn run_submit(registry: &BackendRegistry, backend: &str, native_args: Vec<String>) {
    let handle = resolve(registry, backend);

    let mut raw_spec = String::new();
    if let Err(e) = io::stdin().read_to_string(&mut raw_spec) {
        eprintln!("Error reading job spec from stdin: {}", e);
        process::exit(1);
    }

    match Submitter::new(&handle)
        .with_native_args(native_args)
        .submit(&raw_spec)
    {
        Ok(native_id) => println!("{}", native_id),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn run_info(registry: &BackendRegistry, backend: &str, id: Option<String>, owner: Option<String>) {
    let handle = resolve(registry, backend);
    let selector = Selector::from_options(id.as_deref(), owner.as_deref());

    let json = inspect::inspect(&handle, &selector).and_then(|records| inspect::to_json(&records));
    match json {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn run_cancel(registry: &BackendRegistry, backend: &str, id: &str) {
    let handle = resolve(registry, backend);
    let outcome = cancel::cancel(&handle, id);

    if let Some(message) = outcome.message() {
        if outcome.is_fatal() {
            eprintln!("Error: {}", message);
            process::exit(1);
        }
        println!("{}", message);
    }
}

fn run_backends(registry: &BackendRegistry, json_output: bool) {
    let descriptors: Vec<_> = registry.backends.iter().map(|b| b.descriptor()).collect();

    if json_output {
        match serde_json::to_string_pretty(&descriptors) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    if descriptors.is_empty() {
        println!("No backends configured");
        return;
    }

    println!("{:<16} {:<8} {:<10} DEFAULT QUEUE", "NAME", "KIND", "NAMESPACED");
    for d in descriptors {
        println!(
            "{:<16} {:<8} {:<10} {}",
            d.name,
            d.kind.as_str(),
            if d.namespaces_custom_attributes { "yes" } else { "no" },
            d.default_queue.as_deref().unwrap_or("-")
        );
    }
}
