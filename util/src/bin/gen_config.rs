use clap::{Arg, Command};
use quaver::ClientConfig;
use std::process;

fn main() {
    let matches = Command::new("Config Generator")
        .version("1.0")
        .author("Quaver")
        .about("Writes a client configuration with every setting at its default.")
        .arg(
            Arg::new("CONFIG_FILE")
                .help("Path of the config file to write")
                .required(true),
        )
        .arg(
            Arg::new("SERVER")
                .long("server")
                .help("Access point to use instead of the SRV lookup, as host:port")
                .action(clap::ArgAction::Append),
        )
        .get_matches();

    let config_file_path = matches
        .get_one::<String>("CONFIG_FILE")
        .expect("CONFIG_FILE is required");

    let mut config = ClientConfig::default();

    if let Some(servers) = matches.get_many::<String>("SERVER") {
        config.session.servers = servers.cloned().collect();
    }

    if let Err(err) = config.session.validate() {
        eprintln!("Invalid configuration: {}", err);
        process::exit(1);
    }

    match config.save(config_file_path) {
        Ok(()) => println!("Configuration written to `{}`", config_file_path),
        Err(err) => {
            eprintln!("Failed writing `{}`: {}", config_file_path, err);
            process::exit(1);
        }
    }
}
