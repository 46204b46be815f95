// weft: stand up small virtual network topologies (bridges, switches,
// veth links, namespaces) and manage Linux containers attached to them.
//
// One process per verb; every verb validates its inputs fully before
// mutating anything, and exits nonzero with a printed message otherwise.

mod cli;
mod container;
mod error;
mod net;
mod registry;
mod session;
mod topo;
mod utils;

use clap::{Parser, Subcommand, ValueEnum};
use cli::net::{NetShape, TopoShape};
use error::{Error, Result};
use nix::unistd::geteuid;
use session::Session;
use utils::console::ConsoleLogger;

#[derive(Parser, Debug)]
#[clap(name = "weft", version, about = "Virtual network topologies and containers on Linux bridges", long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum NetShapeArg {
    /// Each container on its own bridge
    Star,
    /// All containers on one shared bridge
    Connected,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum TopoKindArg {
    /// One switch with `--size` hosts
    Single,
    /// Switch tree with `--depth` and `--fanout`
    Tree,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or delete an Ethernet bridge
    Bridge {
        #[clap(long, help = "Add a bridge")]
        add: bool,

        #[clap(long, help = "Delete a bridge")]
        del: bool,

        #[clap(short = 'n', long, help = "Bridge name")]
        name: String,

        #[clap(long = "ip", help = "IPv4 block in CIDR notation (allocated when omitted)")]
        ip: Option<String>,

        #[clap(long = "gw", help = "Upstream gateway interface on the host")]
        gw: Option<String>,

        #[clap(long, help = "Force deletion while containers still use the bridge")]
        force: bool,
    },

    /// Create a container attached to a bridge
    Create {
        #[clap(short = 'n', long, help = "Container name (must be unique)")]
        name: String,

        #[clap(short = 'b', long, help = "Bridge the container attaches to")]
        bridge: String,

        #[clap(short = 's', long, help = "Install a startup script in the container")]
        script: bool,
    },

    /// Start a container
    Start {
        #[clap(short = 'n', long, help = "Container name")]
        name: String,

        #[clap(short = 'd', long, help = "Start in daemon mode")]
        daemon: bool,
    },

    /// Stop a container (its address stays allocated)
    Stop {
        #[clap(short = 'n', long, help = "Container name")]
        name: String,
    },

    /// Destroy a container and release its address
    Destroy {
        #[clap(short = 'n', long, help = "Container name")]
        name: String,

        #[clap(long, help = "Delete the bridge too when this was its last user")]
        release_bridge: bool,
    },

    /// Run a command inside a container
    Execute {
        #[clap(short = 'n', long, help = "Container name")]
        name: String,

        #[clap(last = true, help = "Command and arguments (after --)")]
        command: Vec<String>,
    },

    /// Re-establish bridges and bind mounts after a host reboot
    Reset,

    /// Show bridges and containers with observed state
    Status,

    /// Batch-manage a network of containers over bridges
    Net {
        #[clap(short = 'n', long, help = "Network naming scheme prefix")]
        name: String,

        #[clap(short = 's', long, help = "Number of containers", default_value = "0")]
        size: u32,

        #[clap(short = 't', long, value_enum, help = "Network shape")]
        topology: Option<NetShapeArg>,

        #[clap(long, help = "Create the network")]
        create: bool,

        #[clap(long, help = "Destroy the network")]
        destroy: bool,

        #[clap(long, help = "Start all containers")]
        start: bool,

        #[clap(long, help = "Stop all containers")]
        stop: bool,

        #[clap(long, help = "Run a command in every container")]
        execute: bool,

        #[clap(long = "gw", help = "Upstream gateway interface (--create)")]
        gw: Option<String>,

        #[clap(long, help = "Install startup scripts (--create)")]
        script: bool,

        #[clap(last = true, help = "Command for --execute (after --)")]
        command: Vec<String>,
    },

    /// Build or tear down a veth/switch topology network
    Topo {
        #[clap(short = 'n', long, help = "Network name")]
        name: String,

        #[clap(short = 't', long, value_enum, help = "Topology shape", default_value = "single")]
        topology: TopoKindArg,

        #[clap(long, help = "Build the topology")]
        create: bool,

        #[clap(long, help = "Tear the topology down")]
        destroy: bool,

        #[clap(long, help = "Report observed state per node and link")]
        status: bool,

        #[clap(short = 's', long, help = "Host count (single)", default_value = "2")]
        size: u32,

        #[clap(long, help = "Tree depth (tree)", default_value = "2")]
        depth: u32,

        #[clap(long, help = "Tree fanout (tree)", default_value = "2")]
        fanout: u32,
    },
}

/// Check that exactly one of the listed action flags is set.
fn one_action(actions: &[(&str, bool)]) -> Result<()> {
    let chosen = actions.iter().filter(|(_, set)| *set).count();
    if chosen != 1 {
        let names: Vec<&str> = actions.iter().map(|(n, _)| *n).collect();
        return Err(Error::Validation(format!(
            "must use exactly one of: {}",
            names.join(", ")
        )));
    }
    Ok(())
}

fn dispatch(session: &Session, command: Commands) -> Result<()> {
    match command {
        Commands::Bridge {
            add,
            del,
            name,
            ip,
            gw,
            force,
        } => {
            one_action(&[("--add", add), ("--del", del)])?;
            if add {
                cli::bridge::add(session, &name, ip.as_deref(), gw.as_deref())
            } else {
                cli::bridge::delete(session, &name, force)
            }
        }

        Commands::Create {
            name,
            bridge,
            script,
        } => cli::container::create(session, &name, &bridge, script),

        Commands::Start { name, daemon } => cli::container::start(session, &name, daemon),

        Commands::Stop { name } => cli::container::stop(session, &name),

        Commands::Destroy {
            name,
            release_bridge,
        } => cli::container::destroy(session, &name, release_bridge),

        Commands::Execute { name, command } => cli::container::execute(session, &name, &command),

        Commands::Reset => cli::container::reset(session),

        Commands::Status => {
            cli::bridge::status(session)?;
            ConsoleLogger::separator();
            cli::container::status(session)
        }

        Commands::Net {
            name,
            size,
            topology,
            create,
            destroy,
            start,
            stop,
            execute,
            gw,
            script,
            command,
        } => {
            one_action(&[
                ("--create", create),
                ("--destroy", destroy),
                ("--start", start),
                ("--stop", stop),
                ("--execute", execute),
            ])?;
            utils::validation::InputValidator::validate_network_size(size)?;
            let shape = |t: Option<NetShapeArg>| -> Result<NetShape> {
                match t {
                    Some(NetShapeArg::Star) => Ok(NetShape::Star),
                    Some(NetShapeArg::Connected) => Ok(NetShape::Connected),
                    None => Err(Error::Validation(
                        "indicate the topology with --topology star|connected".to_string(),
                    )),
                }
            };
            if create {
                cli::net::create(session, &name, size, shape(topology)?, gw.as_deref(), script)
            } else if destroy {
                cli::net::destroy(session, &name, size, shape(topology)?)
            } else if start {
                cli::net::start(session, &name, size)
            } else if stop {
                cli::net::stop(session, &name, size)
            } else {
                if command.is_empty() {
                    return Err(Error::Validation(
                        "specify a command after -- for --execute".to_string(),
                    ));
                }
                cli::net::execute(session, &name, size, &command)
            }
        }

        Commands::Topo {
            name,
            topology,
            create,
            destroy,
            status,
            size,
            depth,
            fanout,
        } => {
            one_action(&[
                ("--create", create),
                ("--destroy", destroy),
                ("--status", status),
            ])?;
            if create {
                let shape = match topology {
                    TopoKindArg::Single => TopoShape::Single { size },
                    TopoKindArg::Tree => TopoShape::Tree { depth, fanout },
                };
                cli::net::topo_create(session, &name, shape)
            } else if destroy {
                cli::net::topo_destroy(session, &name)
            } else {
                cli::net::topo_status(session, &name)
            }
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("WEFT_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if !geteuid().is_root() {
        ConsoleLogger::error("weft must be run as root");
        std::process::exit(1);
    }

    let session = Session::from_env();
    if let Err(e) = dispatch(&session, cli.command) {
        ConsoleLogger::error(&e.to_string());
        std::process::exit(1);
    }
}
