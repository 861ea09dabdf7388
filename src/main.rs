//! Command-line interface for dtdval

#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};

#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
use dtdval::{Error, Loader, Validator, XmlParser};

#[cfg(feature = "cli")]
#[derive(Parser, Debug)]
#[command(name = "dtdval")]
#[command(author, version, about = "DTD validation tool", long_about = None)]
struct Cli {
    /// Log DFA construction and validation activity
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[cfg(feature = "cli")]
#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate an XML document against the DTD named by its DOCTYPE
    Validate {
        /// Path to the XML file to validate
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Serve system ids starting with PREFIX from directory DIR
        #[arg(long, value_name = "PREFIX=DIR")]
        map_url: Vec<String>,

        /// Output the result as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Inspect a DTD and display its content models
    Inspect {
        /// Path to the DTD file
        #[arg(value_name = "DTD")]
        dtd: PathBuf,

        /// Show the DFA of a single element
        #[arg(short, long)]
        element: Option<String>,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },
}

#[cfg(feature = "cli")]
fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Validate {
            file,
            map_url,
            json,
        } => cmd_validate(file, map_url, json),
        Commands::Inspect { dtd, element, json } => cmd_inspect(dtd, element, json),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(feature = "cli")]
fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default = if verbose { "dtdval=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(feature = "cli")]
fn cmd_validate(file: PathBuf, map_url: Vec<String>, json_output: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut loader = Loader::new();
    for mapping in &map_url {
        let (prefix, dir) = mapping
            .split_once('=')
            .ok_or_else(|| format!("Invalid URL mapping '{}', expected PREFIX=DIR", mapping))?;
        loader = loader.with_url_mapping(prefix, dir);
    }

    let mut parser = XmlParser::new().with_loader(loader);
    let result = parser.parse_file(&file, &mut ());

    match result {
        Ok(()) => {
            if json_output {
                let json = serde_json::json!({ "valid": true, "file": file.display().to_string() });
                println!("{}", serde_json::to_string_pretty(&json)?);
            } else {
                println!("✓ Document is valid");
            }
            Ok(())
        }
        Err(Error::Validation(error)) => {
            if json_output {
                let json = serde_json::json!({
                    "valid": false,
                    "file": file.display().to_string(),
                    "message": error.message(),
                    "error": error,
                });
                println!("{}", serde_json::to_string_pretty(&json)?);
            } else {
                println!("✗ Document is invalid");
                println!();
                println!("  - {}", error);
            }
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(feature = "cli")]
fn cmd_inspect(dtd: PathBuf, element: Option<String>, json_output: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut parser = XmlParser::new();
    parser.parse_dtd_file(&dtd)?;
    let validator = parser.validator();

    if let Some(name) = element {
        let decl = validator
            .element_decl(&name)
            .ok_or_else(|| format!("Element '{}' not found in DTD", name))?;
        if json_output {
            println!("{}", serde_json::to_string_pretty(&element_json(validator, &name))?);
        } else {
            match validator.dfa(&name) {
                Some(dfa) => println!("{}", dfa),
                None => println!("Element {} has no element declaration", name),
            }
            for attribute in decl.attributes.values() {
                println!("ATTLIST {}", attribute);
            }
        }
        return Ok(());
    }

    if json_output {
        let elements: Vec<serde_json::Value> = validator
            .element_decls()
            .map(|decl| element_json(validator, &decl.name))
            .collect();
        let json = serde_json::json!({
            "version": dtdval::VERSION,
            "statistics": {
                "elements": validator.element_decls().count(),
                "dfas": validator.dfa_count(),
                "notations": validator.notations().len(),
                "entities": validator.entities().len(),
            },
            "elements": elements,
        });
        println!("{}", serde_json::to_string_pretty(&json)?);
    } else {
        println!("dtdval v{}", dtdval::VERSION);
        println!();
        print!("{}", validator);
    }
    Ok(())
}

#[cfg(feature = "cli")]
fn element_json(validator: &Validator, name: &str) -> serde_json::Value {
    let attributes: Vec<String> = validator
        .element_decl(name)
        .map(|decl| decl.attributes.values().map(ToString::to_string).collect())
        .unwrap_or_default();
    let dfa = validator.dfa(name);
    serde_json::json!({
        "name": name,
        "model": dfa.map(|d| d.model().to_string()),
        "category": dfa.map(|d| d.category()),
        "signature": dfa.map(|d| d.model().signature().to_string()),
        "states": dfa.map(|d| d.state_count()),
        "mixed": validator.is_mixed(name),
        "attributes": attributes,
    })
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature not enabled. Rebuild with --features cli");
    std::process::exit(1);
}
