use clap::{Parser, Subcommand, ValueEnum};
use opendbs::document::parse_data;
use opendbs::schema::parse_schema;
use opendbs::{Engine, EngineConfig, OpenDbsError, Predicate, RackKind};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process;

/// OpenDBS CLI: manage databases, racks and documents in a data directory
#[derive(Parser)]
#[command(name = "opendbs", version, about)]
struct Cli {
    /// Data root (overrides the config file and OPENDBS_DATA_DIR)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// YAML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Sql,
    Nosql,
}

impl From<KindArg> for RackKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Sql => RackKind::Sql,
            KindArg::Nosql => RackKind::Nosql,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// List databases
    Databases,

    /// Create a database
    CreateDb { name: String },

    /// Delete a database and every rack in it
    DropDb { name: String },

    /// Rack and document totals for one database
    DbStats { db: String },

    /// Database, rack and document totals
    Stats,

    /// List the racks of a database with their document counts
    Racks { db: String },

    /// Create a rack
    CreateRack {
        db: String,
        rack: String,
        /// Operation family the rack accepts
        #[arg(long, default_value = "nosql")]
        kind: KindArg,
        /// Schema file (YAML or JSON) mapping field names to rules
        #[arg(long)]
        schema: Option<PathBuf>,
    },

    /// Delete a rack
    DropRack { db: String, rack: String },

    /// Copy a rack, documents and indexes included
    DuplicateRack {
        src_db: String,
        src_rack: String,
        dst_db: String,
        dst_rack: String,
    },

    /// Number of documents in a rack
    Count { db: String, rack: String },

    /// Remove every document from a rack
    Clear { db: String, rack: String },

    /// Index a field for equality lookups
    CreateIndex {
        db: String,
        rack: String,
        field: String,
    },

    /// Remove a field index
    DropIndex {
        db: String,
        rack: String,
        field: String,
    },

    /// Insert a document
    Insert {
        db: String,
        rack: String,
        #[command(flatten)]
        input: DocumentInput,
        /// Tag the operation as sql or nosql
        #[arg(long)]
        kind: Option<KindArg>,
    },

    /// Insert every object of a JSON array file
    InsertMany {
        db: String,
        rack: String,
        #[arg(long)]
        file: PathBuf,
    },

    /// Replace a document's data
    Update {
        db: String,
        rack: String,
        id: String,
        #[command(flatten)]
        input: DocumentInput,
    },

    /// Update a document, or insert it under the given id
    Upsert {
        db: String,
        rack: String,
        id: String,
        #[command(flatten)]
        input: DocumentInput,
    },

    /// Delete a document
    Delete { db: String, rack: String, id: String },

    /// Get a single document by ID
    Get { db: String, rack: String, id: String },

    /// Find documents matching a predicate
    Find {
        db: String,
        rack: String,
        /// Predicate JSON (e.g. '{"age": {"$gte": 30}}')
        #[arg(long, default_value = "{}")]
        query: String,
        /// Replace "<rack>:<id>" fields with the referenced documents
        #[arg(long)]
        populate: bool,
    },

    /// Find documents with a field inside [min, max]
    Range {
        db: String,
        rack: String,
        field: String,
        #[arg(long, allow_hyphen_values = true)]
        min: Option<String>,
        #[arg(long, allow_hyphen_values = true)]
        max: Option<String>,
    },

    /// Find documents whose field matches a regular expression
    Pattern {
        db: String,
        rack: String,
        field: String,
        pattern: String,
        /// Regex flags: i, m, s, x
        #[arg(long)]
        options: Option<String>,
    },

    /// Lexical fuzzy search on a string field
    Fuzzy {
        db: String,
        rack: String,
        field: String,
        query: String,
        #[arg(long, default_value_t = 0.7)]
        threshold: f64,
    },

    /// Nearest documents by cosine similarity
    Vector {
        db: String,
        rack: String,
        field: String,
        /// Query vector, comma separated (e.g. 0.1,0.9)
        #[arg(long, value_delimiter = ',', required = true, allow_hyphen_values = true)]
        vector: Vec<f64>,
        #[arg(short, long)]
        k: Option<usize>,
    },
}

/// Document data, as one JSON object or as key=value fields
#[derive(clap::Args)]
struct DocumentInput {
    /// Document JSON object
    #[arg(long, conflicts_with = "fields")]
    data: Option<String>,
    /// Field values (e.g. --field name=Alice --field age=28)
    #[arg(long = "field", value_parser = parse_key_value)]
    fields: Vec<(String, String)>,
}

impl DocumentInput {
    fn into_value(self) -> Result<Value, OpenDbsError> {
        match self.data {
            Some(data) => parse_data(&data),
            None if self.fields.is_empty() => Err(OpenDbsError::Parse(
                "provide the document with --data or --field".into(),
            )),
            None => Ok(fields_to_value(&self.fields)),
        }
    }
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid key=value pair: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<EngineConfig, OpenDbsError> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => {
            let mut config = EngineConfig::default();
            config.apply_env()?;
            config
        }
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    Ok(config)
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let engine = Engine::with_config(load_config(&cli)?)?;
    log::debug!("Opened data root {}", engine.root().display());

    let output = match cli.command {
        Command::Databases => json!(engine.databases()),

        Command::CreateDb { name } => {
            json!({ "ok": engine.create_database(&name)?, "database": name })
        }

        Command::DropDb { name } => {
            json!({ "ok": engine.delete_database(&name)?, "database": name })
        }

        Command::DbStats { db } => engine.database_stats(&db)?,

        Command::Stats => engine.stats(),

        Command::Racks { db } => json!(engine.database_racks(&db)),

        Command::CreateRack {
            db,
            rack,
            kind,
            schema,
        } => {
            let schema = schema.as_deref().map(parse_schema).transpose()?;
            let created = engine.create_rack(&db, &rack, kind.into(), schema)?;
            json!({ "ok": created, "rack": rack })
        }

        Command::DropRack { db, rack } => {
            json!({ "ok": engine.delete_rack(&db, &rack)?, "rack": rack })
        }

        Command::DuplicateRack {
            src_db,
            src_rack,
            dst_db,
            dst_rack,
        } => {
            let copied = engine.duplicate_rack(&src_db, &src_rack, &dst_db, &dst_rack)?;
            json!({ "ok": copied, "database": dst_db, "rack": dst_rack })
        }

        Command::Count { db, rack } => {
            let count = engine
                .rack_count(&db, &rack)
                .ok_or_else(|| OpenDbsError::RackNotFound {
                    database: db.clone(),
                    rack: rack.clone(),
                })?;
            json!({ "count": count })
        }

        Command::Clear { db, rack } => json!({ "ok": engine.clear_rack(&db, &rack)? }),

        Command::CreateIndex { db, rack, field } => {
            json!({ "ok": engine.create_index(&db, &rack, &field)?, "field": field })
        }

        Command::DropIndex { db, rack, field } => {
            json!({ "ok": engine.drop_index(&db, &rack, &field)?, "field": field })
        }

        Command::Insert {
            db,
            rack,
            input,
            kind,
        } => {
            let id = engine.insert(&db, &rack, input.into_value()?, kind.map(RackKind::from))?;
            json!({ "id": id })
        }

        Command::InsertMany { db, rack, file } => {
            let content = std::fs::read_to_string(&file)
                .map_err(|e| format!("Failed to read '{}': {e}", file.display()))?;
            let items: Vec<Value> = serde_json::from_str(&content).map_err(|e| {
                OpenDbsError::Parse(format!("'{}' is not a JSON array: {e}", file.display()))
            })?;
            let ids = engine.insert_many(&db, &rack, items)?;
            json!({ "ids": ids, "count": ids.len() })
        }

        Command::Update {
            db,
            rack,
            id,
            input,
        } => {
            let updated = engine.update(&db, &rack, &id, input.into_value()?)?;
            json!({ "ok": updated, "id": id })
        }

        Command::Upsert {
            db,
            rack,
            id,
            input,
        } => {
            let (id, created) = engine.upsert(&db, &rack, &id, input.into_value()?)?;
            json!({ "id": id, "created": created })
        }

        Command::Delete { db, rack, id } => {
            json!({ "ok": engine.delete(&db, &rack, &id)?, "deleted": id })
        }

        Command::Get { db, rack, id } => engine.get(&db, &rack, &id).ok_or_else(|| {
            format!("Document '{id}' not found in '{db}/{rack}'")
        })?,

        Command::Find {
            db,
            rack,
            query,
            populate,
        } => {
            let predicate = Predicate::parse_str(&query)?;
            search_output(engine.find_with(&db, &rack, &predicate, populate))
        }

        Command::Range {
            db,
            rack,
            field,
            min,
            max,
        } => {
            let predicate = Predicate::range(
                &field,
                min.as_deref().map(scalar_arg),
                max.as_deref().map(scalar_arg),
            );
            search_output(engine.find_with(&db, &rack, &predicate, false))
        }

        Command::Pattern {
            db,
            rack,
            field,
            pattern,
            options,
        } => {
            let predicate = Predicate::pattern(&field, &pattern, options.as_deref())?;
            search_output(engine.find_with(&db, &rack, &predicate, false))
        }

        Command::Fuzzy {
            db,
            rack,
            field,
            query,
            threshold,
        } => search_output(engine.fuzzy_search(&db, &rack, &field, &query, threshold)),

        Command::Vector {
            db,
            rack,
            field,
            vector,
            k,
        } => search_output(engine.vector_search(&db, &rack, &field, &vector, k)),
    };

    print_output(&output, &cli.format)
}

fn search_output(results: Vec<Value>) -> Value {
    let count = results.len();
    json!({ "results": results, "count": count })
}

fn print_output(value: &Value, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

/// JSON when it parses (numbers, booleans, arrays, objects), else a plain string.
fn scalar_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn fields_to_value(fields: &[(String, String)]) -> Value {
    let mut map = serde_json::Map::new();
    for (key, val) in fields {
        map.insert(key.clone(), scalar_arg(val));
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("name=Alice=B").unwrap(),
            ("name".to_string(), "Alice=B".to_string())
        );
        assert!(parse_key_value("name").is_err());
    }

    #[test]
    fn test_fields_to_value_parses_json_scalars() {
        let fields = vec![
            ("age".to_string(), "28".to_string()),
            ("name".to_string(), "Alice".to_string()),
            ("tags".to_string(), "[1,2]".to_string()),
        ];
        assert_eq!(
            fields_to_value(&fields),
            json!({ "age": 28, "name": "Alice", "tags": [1, 2] })
        );
    }

    #[test]
    fn test_document_input_requires_data() {
        let input = DocumentInput {
            data: None,
            fields: vec![],
        };
        assert!(input.into_value().is_err());

        let input = DocumentInput {
            data: Some(r#"{"a": 1}"#.into()),
            fields: vec![],
        };
        assert_eq!(input.into_value().unwrap(), json!({ "a": 1 }));
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "opendbs", "--format", "json", "vector", "app", "items", "emb", "--vector", "0.5,-1", "-k", "3",
        ])
        .unwrap();
        match cli.command {
            Command::Vector { vector, k, .. } => {
                assert_eq!(vector, vec![0.5, -1.0]);
                assert_eq!(k, Some(3));
            }
            _ => panic!("expected vector command"),
        }
    }
}
