
use std::path::PathBuf;

use clap::builder::Styles;
use clap::builder::styling::AnsiColor;
use clap::{Args, Parser, Subcommand};

/// Cargo-like help colours.
fn styles() -> Styles {
	Styles::styled()
		.header(AnsiColor::Green.on_default().bold())
		.usage(AnsiColor::Green.on_default().bold())
		.literal(AnsiColor::Cyan.on_default())
		.placeholder(AnsiColor::Cyan.on_default())
}

/// Remote procedure calls over an MQTT broker.
#[derive(Parser, Debug)]
#[command(name = "mindctrl")]
#[command(about = "Serve and call mindctrl procedures over MQTT")]
#[command(version)]
#[command(styles = styles())]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Configuration file (default: $XDG_CONFIG_HOME/mindctrl/config.json)
	#[arg(long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Serve procedures under a name until interrupted.
	Serve(ServeArgs),
	/// Invoke a procedure on a server and print its output.
	Call(CallArgs),
	/// Print whether a server is alive.
	Status(StatusArgs),
	/// Show or change the stored configuration.
	Config {
		#[command(subcommand)]
		action: ConfigAction,
	},
}

/// Broker connection overrides shared by every networked command.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct BusArgs {
	/// Broker URL (mqtt, mqtts, tcp, ssl, ws or wss)
	#[arg(long, value_name = "URL")]
	pub url: Option<String>,

	#[arg(long, value_name = "USER")]
	pub username: Option<String>,

	#[arg(long, value_name = "PASSWORD")]
	pub password: Option<String>,

	/// Topic namespace prefix
	#[arg(long, value_name = "PREFIX", default_value = mindctrl_protocol::DEFAULT_NAMESPACE)]
	pub namespace: String,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
	#[command(flatten)]
	pub bus: BusArgs,

	/// Server name to serve under
	#[arg(long, value_name = "NAME")]
	pub name: Option<String>,

	/// Serve the full catalogue against an in-memory host
	#[arg(long)]
	pub simulate: bool,

	/// Seconds between liveness republishes
	#[arg(long, value_name = "SECS", default_value_t = 60)]
	pub liveness_interval: u64,

	/// Seconds to wait for the broker to accept the connection
	#[arg(long, value_name = "SECS", default_value_t = 10)]
	pub connect_timeout: u64,
}

#[derive(Args, Debug, Clone)]
pub struct CallArgs {
	/// Procedure name, for example `tabs.find`
	#[arg(value_name = "METHOD")]
	pub method: String,

	/// JSON object passed as the procedure input
	#[arg(long, value_name = "JSON", default_value = "{}")]
	pub params: String,

	/// Target server (default: the configured name)
	#[arg(long, value_name = "NAME")]
	pub server: Option<String>,

	/// Seconds to wait for the response
	#[arg(long, value_name = "SECS", default_value_t = 30)]
	pub timeout: u64,

	#[command(flatten)]
	pub bus: BusArgs,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
	/// Server to inspect (default: the configured name)
	#[arg(long, value_name = "NAME")]
	pub server: Option<String>,

	/// Seconds to wait for the retained status marker
	#[arg(long, value_name = "SECS", default_value_t = 2)]
	pub wait: u64,

	#[command(flatten)]
	pub bus: BusArgs,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
	/// Print the stored configuration.
	Show,
	/// Validate and store a configuration.
	Set {
		#[arg(long, value_name = "URL")]
		url: String,

		#[arg(long, value_name = "NAME")]
		name: String,

		#[arg(long, value_name = "USER")]
		username: Option<String>,

		#[arg(long, value_name = "PASSWORD")]
		password: Option<String>,
	},
}
