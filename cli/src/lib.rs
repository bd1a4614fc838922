use anyhow::{anyhow, Error, Result};
use clap::{Parser, Subcommand};
use log::info;
use rdfmap::api::{EntityManager, EntityManagerFactory};
use rdfmap::config::{FactoryRegistry, UnitConfig};
use rdfmap::metadata::MetadataIndex;
use rdfmap::schema::SchemaDocument;
use rdfmap::util::write_ntriples;
use rdfmap::{RdfId, Value};
use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "rdfmap")]
#[command(about = "Load and query entities mapped onto RDF data")]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Verbose mode - sets the RUST_LOG level to info, defaults to warning level
    #[clap(long, short, action, default_value = "false", global = true)]
    verbose: bool,
    /// Debug mode - sets the RUST_LOG level to debug, defaults to warning level
    #[clap(long, action, default_value = "false", global = true)]
    debug: bool,
    /// Path to the persistence unit configuration
    #[clap(long, short, default_value = "rdfmap.json", global = true)]
    config: PathBuf,
    /// Name of the persistence unit to open, defaults to the first one
    #[clap(long, short, global = true)]
    unit: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List the persistence units in the configuration
    Units,
    /// Run a query fragment or a full query and print its results
    Query {
        /// The query text; a bare graph pattern is completed to select ?result
        query: String,
        /// Load each ?result as this entity type and print it as JSON
        #[clap(long = "type", short = 't')]
        type_name: Option<String>,
        /// Query parameters as name=value; use <iri> or _:label for resources
        #[clap(long = "param", short = 'p')]
        params: Vec<String>,
        /// Maximum number of results
        #[clap(long)]
        limit: Option<usize>,
    },
    /// Load an entity by type and identifier and print it as JSON
    Find {
        /// The entity type name
        type_name: String,
        /// The IRI (or _:label) of the resource
        id: String,
    },
    /// Print every statement about a resource as N-Triples
    Describe {
        /// The IRI (or _:label) of the resource
        id: String,
    },
}

pub fn run() -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    run_from_args_to(std::env::args_os(), &mut out)
}

pub fn run_from_args<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    run_from_args_to(args, &mut out)
}

/// Like [`run_from_args`], writing command output to `out`.
pub fn run_from_args_to<I, T>(args: I, out: &mut dyn Write) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    rdfmap::api::init_logging();
    let cmd = Cli::try_parse_from(args).map_err(Error::from)?;
    execute(cmd, out)
}

fn execute(cmd: Cli, out: &mut dyn Write) -> Result<()> {
    // RUST_LOG is set by `init_logging` if RDFMAP_LOG is present; the
    // verbosity flags win over both.
    if cmd.debug {
        std::env::set_var("RUST_LOG", "debug");
    } else if cmd.verbose {
        std::env::set_var("RUST_LOG", "info");
    } else if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "warn");
    }
    let _ = env_logger::try_init();

    let config = UnitConfig::from_file(&cmd.config)
        .map_err(|e| anyhow!("Cannot read {}: {}", cmd.config.display(), e))?;

    if let Commands::Units = cmd.command {
        for unit in &config.units {
            writeln!(
                out,
                "{}\t{}\t{} file(s)",
                unit.name(),
                unit.factory(),
                unit.files().len()
            )?;
        }
        return Ok(());
    }

    let mut em = open(&config, cmd.unit.as_deref())?;
    match cmd.command {
        Commands::Units => {}
        Commands::Query {
            query,
            type_name,
            params,
            limit,
        } => {
            let params = params
                .iter()
                .map(|p| parse_param(p))
                .collect::<Result<Vec<_>>>()?;
            match type_name {
                Some(type_name) => {
                    let mut typed = em.create_typed_query(&type_name, &query)?;
                    for (name, value) in params {
                        typed.set_parameter(&name, value);
                    }
                    if let Some(limit) = limit {
                        typed.set_limit(limit);
                    }
                    for record in typed.get_result_list()? {
                        writeln!(out, "{}", record.to_json())?;
                    }
                }
                None => {
                    let mut raw = em.create_query(&query)?;
                    for (name, value) in params {
                        raw.set_parameter(&name, value);
                    }
                    if let Some(limit) = limit {
                        raw.set_limit(limit);
                    }
                    let rows = raw.execute()?;
                    let variables = rows.variables().to_vec();
                    writeln!(out, "{}", variables.join("\t"))?;
                    for row in rows {
                        let cells: Vec<String> = variables
                            .iter()
                            .map(|v| row.get(v).map(|t| t.to_string()).unwrap_or_default())
                            .collect();
                        writeln!(out, "{}", cells.join("\t"))?;
                    }
                }
            }
        }
        Commands::Find { type_name, id } => {
            let id = RdfId::parse(&id)?;
            let record = em
                .find(&type_name, &id)?
                .ok_or_else(|| anyhow!("{} {} not found", type_name, id))?;
            writeln!(out, "{}", serde_json::to_string_pretty(&record.to_json())?)?;
        }
        Commands::Describe { id } => {
            let id = RdfId::parse(&id)?;
            let graph = em.describe(&id)?;
            write_ntriples(&graph, &mut *out)?;
        }
    }
    em.close();
    Ok(())
}

/// Opens the named unit (or the first one) with every schema document of
/// the configuration registered.
fn open(config: &UnitConfig, unit: Option<&str>) -> Result<EntityManager> {
    let unit = match unit {
        Some(name) => config.unit(name)?,
        None => config
            .units
            .first()
            .ok_or_else(|| anyhow!("The configuration declares no persistence units"))?,
    };
    let index = Arc::new(MetadataIndex::new());
    for schema in &config.schemas {
        info!("Registering schema document {}", schema.display());
        index.register_document(SchemaDocument::from_file(schema)?);
    }
    let factory =
        EntityManagerFactory::from_unit(unit, &FactoryRegistry::with_defaults(), index)?;
    Ok(factory.create_entity_manager())
}

/// Parses `name=value`. `<iri>` and `_:label` become resources, integers
/// and booleans keep their type, anything else is a string.
fn parse_param(param: &str) -> Result<(String, Value)> {
    let (name, raw) = param
        .split_once('=')
        .ok_or_else(|| anyhow!("Parameter '{}' is not of the form name=value", param))?;
    let value = if (raw.starts_with('<') && raw.ends_with('>')) || raw.starts_with("_:") {
        Value::Resource(RdfId::parse(raw)?)
    } else if let Ok(i) = raw.parse::<i32>() {
        Value::Int(i)
    } else if let Ok(l) = raw.parse::<i64>() {
        Value::Long(l)
    } else if let Ok(b) = raw.parse::<bool>() {
        Value::Bool(b)
    } else {
        Value::from(raw)
    };
    Ok((name.trim_start_matches("??").to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_keep_their_types() {
        assert_eq!(parse_param("n=3").unwrap(), ("n".to_string(), Value::Int(3)));
        assert_eq!(
            parse_param("who=<http://example.org/a>").unwrap().1,
            Value::Resource(RdfId::iri("http://example.org/a").unwrap())
        );
        assert_eq!(parse_param("flag=true").unwrap().1, Value::Bool(true));
        assert_eq!(parse_param("name=Ada").unwrap().1, Value::from("Ada"));
        assert!(parse_param("oops").is_err());
    }
}
