use clap::Parser;

use scout_lib::cli::Cli;

fn main() {
    let cli = Cli::parse();
    let json = cli.json;

    if let Err(e) = scout_lib::run(cli) {
        if json {
            match serde_json::to_string(&e) {
                Ok(line) => eprintln!("{}", line),
                Err(_) => eprintln!("error: {}", e),
            }
        } else {
            eprintln!("error: {}", e);
        }
        std::process::exit(1);
    }
}
