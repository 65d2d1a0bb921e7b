use anyhow::{bail, Context, Result};
use clap::Parser;
use resource_query::config::EngineConfig;
use resource_query::lexer::tokenize;
use resource_query::params::QueryParams;
use resource_query::parser::parse_expression;
use resource_query::query::{resolve_resource_path, Query};
use resource_query::sql_compiler::SqlCompiler;
use resource_query::store::InMemoryResourceStore;
use resource_query::{QueryError, ResourceType, SchemaRegistry};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "resource_query", version, about = "Interactive resource query shell")]
struct Args {
    /// Schema registry and table mapping
    #[arg(long, default_value = "demos/cluster_schema.json")]
    config: PathBuf,

    /// Resources served by the in-memory store
    #[arg(long, default_value = "demos/cluster_data.json")]
    data: PathBuf,

    /// Run one query and exit, e.g. `Cluster/c1/hosts?fields=Hosts/state`
    #[arg(short, long)]
    query: Option<String>,
}

const HELP: &str = "\
<Type>[/<id>[/<sub-resource>[/<id>...]]][?<query string>]   run a query
:tokens <expression>                                        show lexer output
:predicate <expression>                                     show the parsed predicate
:sql <Type> <expression>                                    compile the predicate to SQL
:schema                                                     list resource types
:quit";

struct Shell {
    registry: SchemaRegistry,
    store: InMemoryResourceStore,
    compiler: SqlCompiler,
}

impl Shell {
    fn handle(&self, line: &str) -> Result<()> {
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        match command {
            ":help" => println!("{}", HELP),
            ":schema" => {
                let mut kinds: Vec<&ResourceType> = self.registry.resource_types().collect();
                kinds.sort();
                for kind in kinds {
                    let schema = self.registry.schema(kind)?;
                    let subs: Vec<&str> =
                        schema.sub_resources().iter().map(|d| d.name.as_str()).collect();
                    println!("{} (sub-resources: {})", kind, subs.join(", "));
                }
            }
            ":tokens" => {
                for token in tokenize(rest)? {
                    println!("{}", token);
                }
            }
            ":predicate" => match parse_expression(rest)? {
                Some(predicate) => println!("{}\n{:#?}", predicate, predicate),
                None => println!("(no predicate)"),
            },
            ":sql" => {
                let (kind, expression) = rest.split_once(' ').unwrap_or((rest, ""));
                if kind.is_empty() {
                    bail!("usage: :sql <Type> <expression>");
                }
                let predicate = parse_expression(expression)?;
                let result = self.compiler.compile(&ResourceType::from(kind), predicate.as_ref())?;
                println!("{}", result.sql);
                for optimization in &result.optimizations {
                    println!("  optimization: {:?}", optimization);
                }
            }
            _ => println!("{}", self.query(line)?),
        }
        Ok(())
    }

    fn query(&self, line: &str) -> Result<String> {
        let (path, query_string) = line.split_once('?').unwrap_or((line, ""));
        let (kind, key_values) = resolve_resource_path(&self.registry, path)?;

        let mut query = Query::new(&self.registry, &kind, key_values)?;
        QueryParams::parse(query_string)?.apply(&mut query)?;
        let tree = query.execute(&self.store)?;

        serde_json::to_string_pretty(&tree).context("cannot render result tree")
    }
}

fn report(error: &anyhow::Error) {
    match error.downcast_ref::<QueryError>() {
        Some(e) if !e.is_client_error() => eprintln!("server error: {}", e),
        Some(e) => eprintln!("{}", e),
        None => eprintln!("error: {:#}", error),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "resource_query=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = EngineConfig::from_json_file(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;
    let shell = Shell {
        registry: config.schema_registry()?,
        store: InMemoryResourceStore::from_json_file(&args.data)
            .with_context(|| format!("loading data {}", args.data.display()))?,
        compiler: config.sql_compiler(),
    };
    tracing::info!(
        config = %args.config.display(),
        data = %args.data.display(),
        "resource query shell ready"
    );

    if let Some(line) = args.query {
        return shell.handle(&line);
    }

    println!("--- resource query shell (:help for commands) ---");
    let mut rl = DefaultEditor::new()?;
    loop {
        match rl.readline("query> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(line)?;
                if line == ":quit" {
                    break;
                }
                if let Err(e) = shell.handle(line) {
                    report(&e);
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}
