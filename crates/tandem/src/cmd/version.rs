use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("tandem {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: tandem");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("target: {}", env!("TANDEM_BUILD_TARGET"));
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("unix_sockets: {}", cfg!(unix));

    Ok(SUCCESS)
}
