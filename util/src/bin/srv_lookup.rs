use clap::{Arg, Command};
use flint::logging;
use quaver::net::resolve::{self, DnsResolver, Resolve};
use quaver::ClientConfig;
use std::process;

fn main() {
    let matches = Command::new("Access Point Lookup")
        .version("1.0")
        .author("Quaver")
        .about("Prints the access points a login would try, in order.")
        .arg(
            Arg::new("CONFIG_FILE")
                .help("Path to the config file, defaults are used when omitted")
                .required(false),
        )
        .get_matches();

    let config = match matches.get_one::<String>("CONFIG_FILE") {
        Some(path) => match ClientConfig::load(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("Failed loading `{}`: {}", path, err);
                process::exit(1);
            }
        },
        None => ClientConfig::default(),
    };

    let log = match logging::init(&config.log) {
        Ok(log) => log,
        Err(err) => {
            eprintln!("Failed setting up logging: {}", err);
            process::exit(1);
        }
    };

    let resolver = match DnsResolver::from_system_conf() {
        Ok(resolver) => resolver,
        Err(err) => {
            logging::error!(log, "resolver unavailable"; "error" => %err);
            process::exit(1);
        }
    };

    let records = match config.session.servers.is_empty() {
        true => match resolver.service_records(&config.session.service) {
            Ok(records) => resolve::sort_records(records),
            Err(err) => {
                logging::error!(log, "service lookup failed"; "service" => &config.session.service, "error" => %err);
                process::exit(1);
            }
        },
        _ => config
            .session
            .servers
            .iter()
            .filter_map(|server| resolve::parse_server(server))
            .collect(),
    };

    for record in records {
        println!("{} (priority {}, weight {})", record, record.priority, record.weight);

        match resolver.addresses(&record.host, record.port) {
            Ok(addresses) => {
                for address in addresses {
                    println!("    {}", address);
                }
            }
            Err(err) => println!("    unresolvable: {}", err),
        }
    }
}
