use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde_json::Value;
use tandem_command::CommandDefinition;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Print an invocation result.
pub fn print_value(value: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{value}"),
        OutputFormat::Pretty => println!(
            "{}",
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        ),
        OutputFormat::Table => match value {
            Value::Object(map) => {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(vec!["KEY", "VALUE"]);
                for (key, value) in map {
                    table.add_row(vec![key.clone(), cell(value)]);
                }
                println!("{table}");
            }
            other => println!("{}", cell(other)),
        },
    }
}

/// Print registered operations and their parameter defaults.
pub fn print_definitions(definitions: &[std::sync::Arc<CommandDefinition>], format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Pretty => {
            let listing: Vec<Value> = definitions
                .iter()
                .map(|definition| {
                    serde_json::json!({
                        "name": definition.qualified_name(),
                        "defaults": definition.defaults(),
                    })
                })
                .collect();
            print_value(&Value::Array(listing), format);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["OPERATION", "DEFAULTS"]);
            for definition in definitions {
                table.add_row(vec![
                    definition.qualified_name().to_string(),
                    definition.defaults().to_string(),
                ]);
            }
            println!("{table}");
        }
    }
}

fn cell(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
