use tandem::command::Registry;
use tandem::demo;

use crate::cmd::ListArgs;
use crate::exit::{command_error, CliResult, SUCCESS};
use crate::output::{print_definitions, OutputFormat};

pub fn run(_args: ListArgs, format: OutputFormat) -> CliResult<i32> {
    let registry = Registry::new();
    demo::register(&registry).map_err(|err| command_error("registering operations", err))?;
    print_definitions(&registry.definitions(), format);
    Ok(SUCCESS)
}
