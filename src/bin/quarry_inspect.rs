/// Store inspection tool: geometry, cache counters, file-page mapping,
/// and page chains of a posting-list store.
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use quarry::store::FileStore;

#[derive(Parser)]
#[command(name = "quarry-inspect", about = "Inspect a quarry posting-list store")]
struct Cli {
    /// Path to the store file.
    store: PathBuf,

    #[command(subcommand)]
    command: Command,

    /// Emit JSON instead of text.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Page geometry, usage, and cache counters.
    Stats,
    /// All files with their first page and page count.
    Files,
    /// The page chain of one file.
    Chain { file_no: i32 },
}

fn run(cli: &Cli) -> quarry::Result<()> {
    let store = FileStore::open(&cli.store)?;
    match &cli.command {
        Command::Stats => {
            let stats = store.stats();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats).unwrap());
            } else {
                println!("page size:       {}", stats.page_size);
                println!("page count:      {}", stats.page_count);
                println!("used pages:      {}", stats.used_pages);
                println!("files:           {}", stats.file_count);
                println!("total bytes:     {}", stats.total_bytes);
                println!(
                    "reads:           {} ({} uncached)",
                    stats.cached_reads, stats.uncached_reads
                );
                println!(
                    "writes:          {} ({} uncached)",
                    stats.cached_writes, stats.uncached_writes
                );
            }
        }
        Command::Files => {
            let entries = store.file_page_mapping()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&entries).unwrap());
            } else {
                println!("{:>8} {:>12} {:>12}", "file", "first page", "pages");
                for e in &entries {
                    println!("{:>8} {:>12} {:>12}", e.file_no, e.first_page, e.page_count);
                }
            }
        }
        Command::Chain { file_no } => {
            let chain = store.file_chain(*file_no)?;
            if cli.json {
                println!("{}", serde_json::to_string(&chain).unwrap());
            } else {
                let rendered: Vec<String> = chain.iter().map(|p| p.to_string()).collect();
                println!("{}", rendered.join(" -> "));
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
