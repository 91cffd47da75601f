//! compression-engine CLI
//!
//! Compress a portfolio of mirrored trades from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Full compression report from a JSON trade file
//! compression-engine compress --input trades.json
//!
//! # Output as JSON
//! compression-engine compress --input trades.json --format json
//!
//! # Netting targets only, per book
//! compression-engine netting --input trades.json --book-level
//!
//! # Generate a random portfolio for testing
//! compression-engine generate --parties 10 --trades 500 --seed 7
//! ```

use compression_engine::core::bucket::{BookLevel, PositionLevel};
use compression_engine::core::currency::CurrencyCode;
use compression_engine::ingest::loader::{Portfolio, TradeFile};
use compression_engine::optimization::engine::EngineConfig;
use compression_engine::optimization::netting::{compute_netting, render_table, NettingSummary};
use compression_engine::pipeline::CompressionPipeline;
use compression_engine::simulation::generator::{generate_portfolio, GeneratorConfig};
use serde::Serialize;
use std::fs;
use std::process;
use std::str::FromStr;

fn print_usage() {
    eprintln!(
        r#"compression-engine: portfolio compression for mirrored bilateral trades

USAGE:
    compression-engine <COMMAND> [OPTIONS]

COMMANDS:
    compress    Net, propose and reconcile a trade file
    netting     Show netting targets for a trade file
    generate    Generate a random trade file (for testing)
    help        Show this message

OPTIONS (compress, netting):
    --input <FILE>      Path to JSON trade file
    --format <FORMAT>   Output format: text (default) or json

OPTIONS (compress):
    --hub <PARTY>       Party absorbing unmatched residuals (default: HUB)
    --hub-book <BOOK>   Book for hub legs (default: HUB)
    --prefix <PREFIX>   Prefix of new clearing ids (default: CCP)
    --max-steps <N>     Step budget per subset search (default: 1000000)
    --redistribute      Reroute leftover hub pairs directly between parties

OPTIONS (netting):
    --book-level        Net per book instead of per position

OPTIONS (generate):
    --parties <N>       Number of parties (default: 20)
    --trades <N>        Number of trades (default: 1000)
    --maturities <N>    Number of maturity dates (default: 3)
    --books <N>         Maximum books per party (default: 1)
    --currencies <LIST> Comma-separated currency codes (default: AUD)
    --seed <N>          Seed for a reproducible portfolio
    --output <FILE>     Write to file instead of stdout

EXAMPLES:
    compression-engine compress --input trades.json
    compression-engine compress --input trades.json --hub A --format json
    compression-engine netting --input trades.json --book-level
    compression-engine generate --parties 5 --trades 200 --currencies AUD,USD --output trades.json"#
    );
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("{}", message);
    process::exit(1);
}

/// Value following the option at `args[*i]`.
fn option_value(args: &[String], i: &mut usize, message: &str) -> String {
    *i += 1;
    args.get(*i).cloned().unwrap_or_else(|| fail(message))
}

fn parse_option<T: FromStr>(args: &[String], i: &mut usize, message: &str) -> T {
    option_value(args, i, message)
        .parse()
        .unwrap_or_else(|_| fail(message))
}

fn print_json<T: Serialize>(value: &T) {
    let json = serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| fail(format!("Error writing JSON: {}", e)));
    println!("{}", json);
}

fn load_portfolio(path: &str) -> Portfolio {
    Portfolio::load_json(path).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        eprintln!("Expected format:");
        eprintln!(
            r#"{{
  "trades": [
    {{ "party": "A", "book": "1BKA", "trade_id": "A0", "direction": "P", "currency": "AUD",
      "maturity_date": "2023/12/31", "counterparty": "B", "clearing_id": "CCP0", "notional": "5000" }}
  ]
}}"#
        );
        process::exit(1);
    })
}

fn check_format(format: &str) {
    if format != "text" && format != "json" {
        fail(format!("Unknown format: {} (expected 'text' or 'json')", format));
    }
}

fn cmd_compress(args: &[String]) {
    let mut input_path = None;
    let mut format = "text".to_string();
    let mut config = EngineConfig::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--input" => input_path = Some(option_value(args, &mut i, "--input requires a file path")),
            "--format" => format = option_value(args, &mut i, "--format requires 'text' or 'json'"),
            "--hub" => config = config.with_hub(option_value(args, &mut i, "--hub requires a party")),
            "--hub-book" => {
                config = config.with_hub_book(option_value(args, &mut i, "--hub-book requires a book"))
            }
            "--prefix" => {
                config = config.with_clearing_id_prefix(option_value(args, &mut i, "--prefix requires a prefix"))
            }
            "--max-steps" => {
                config = config.with_max_search_steps(parse_option(args, &mut i, "--max-steps requires a number"))
            }
            "--redistribute" => config = config.with_hub_redistribution(true),
            other => fail(format!("Unknown option: {}", other)),
        }
        i += 1;
    }
    check_format(&format);

    let path = input_path.unwrap_or_else(|| fail("Error: --input <FILE> is required"));
    let portfolio = load_portfolio(&path);
    let report = CompressionPipeline::new(config)
        .run_portfolio(&portfolio)
        .unwrap_or_else(|e| fail(format!("Compression failed: {}", e)));

    if format == "json" {
        print_json(&report);
    } else {
        println!("{}", report);
    }
}

fn cmd_netting(args: &[String]) {
    let mut input_path = None;
    let mut format = "text".to_string();
    let mut book_level = false;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--input" => input_path = Some(option_value(args, &mut i, "--input requires a file path")),
            "--format" => format = option_value(args, &mut i, "--format requires 'text' or 'json'"),
            "--book-level" => book_level = true,
            other => fail(format!("Unknown option: {}", other)),
        }
        i += 1;
    }
    check_format(&format);

    let path = input_path.unwrap_or_else(|| fail("Error: --input <FILE> is required"));
    let portfolio = load_portfolio(&path);
    if !portfolio.excluded.is_empty() {
        eprintln!("Excluded {} trade legs", portfolio.excluded.len());
    }

    if book_level {
        let results = compute_netting(&portfolio.trades, &BookLevel);
        if format == "json" {
            print_json(&results);
        } else {
            print!("{}", render_table(&results));
            println!("\n{}", NettingSummary::from_results(&results));
        }
    } else {
        let results = compute_netting(&portfolio.trades, &PositionLevel);
        if format == "json" {
            print_json(&results);
        } else {
            print!("{}", render_table(&results));
            println!("\n{}", NettingSummary::from_results(&results));
        }
    }
}

fn cmd_generate(args: &[String]) {
    let mut config = GeneratorConfig::default();
    let mut output_path: Option<String> = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--parties" => config.party_count = parse_option(args, &mut i, "--parties requires a number"),
            "--trades" => config.trade_count = parse_option(args, &mut i, "--trades requires a number"),
            "--maturities" => {
                config.maturity_count = parse_option(args, &mut i, "--maturities requires a number")
            }
            "--books" => config.max_books = parse_option(args, &mut i, "--books requires a number"),
            "--currencies" => {
                config.currencies = option_value(args, &mut i, "--currencies requires a comma-separated list")
                    .split(',')
                    .map(|s| CurrencyCode::new(s.trim()))
                    .collect();
            }
            "--seed" => config.seed = Some(parse_option(args, &mut i, "--seed requires a number")),
            "--output" => output_path = Some(option_value(args, &mut i, "--output requires a file path")),
            other => fail(format!("Unknown option: {}", other)),
        }
        i += 1;
    }

    let trades = generate_portfolio(&config).unwrap_or_else(|e| fail(format!("Error: {}", e)));
    let json = serde_json::to_string_pretty(&TradeFile::from_trade_set(&trades))
        .unwrap_or_else(|e| fail(format!("Error writing JSON: {}", e)));

    if let Some(path) = output_path {
        fs::write(&path, &json).unwrap_or_else(|e| fail(format!("Error writing to '{}': {}", path, e)));
        eprintln!(
            "Generated {} trades across {} parties → {}",
            trades.len(),
            config.party_count,
            path
        );
    } else {
        println!("{}", json);
    }
}

fn main() {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let command = args[1].as_str();
    let rest = &args[2..];

    match command {
        "compress" => cmd_compress(rest),
        "netting" => cmd_netting(rest),
        "generate" => cmd_generate(rest),
        "help" | "--help" | "-h" => print_usage(),
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            process::exit(1);
        }
    }
}
