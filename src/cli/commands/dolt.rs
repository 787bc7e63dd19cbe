//! `gt dolt`: store server lifecycle.

use std::time::Duration;

use clap::Subcommand;

use crate::Result;
use crate::dolt::DoltClient;

#[derive(Subcommand, Debug)]
pub enum DoltCmd {
    /// Start the store server.
    Start,
    /// Stop the store server.
    Stop,
    /// Show store status.
    Status,
    /// List databases.
    List,
    /// Run a query against a database.
    Sql { db: String, query: String },
    /// Initialize a database for a rig.
    InitRig { rig: String },
}

pub(crate) fn handle(cmd: DoltCmd) -> Result<()> {
    let town = super::super::require_town_root()?;
    let dolt = DoltClient::new(&town);
    match cmd {
        DoltCmd::Start => {
            let state = dolt.start_server()?;
            println!("Store server started (pid {}, port {})", state.pid, state.port);
        }
        DoltCmd::Stop => {
            if dolt.stop_server()? {
                println!("Store server stopped");
            } else {
                println!("Store server was not running");
            }
        }
        DoltCmd::Status => {
            if dolt.tcp_probe(Duration::from_secs(2)) {
                println!("Store reachable at {}:{}", dolt.host(), dolt.port());
            } else {
                println!("Store unreachable at {}:{}", dolt.host(), dolt.port());
            }
        }
        DoltCmd::List => {
            for db in dolt.list_databases()? {
                println!("{db}");
            }
        }
        DoltCmd::Sql { db, query } => {
            print!("{}", dolt.sql(&db, &query)?);
        }
        DoltCmd::InitRig { rig } => {
            dolt.init_database(&rig)?;
            println!("Initialized database for rig '{rig}'");
        }
    }
    Ok(())
}
