//! Command-line surface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use beam_core::TransferConfig;
use beam_core::config::{
    DEFAULT_BUFFERED_LOW, DEFAULT_BUFFERED_MAX, DEFAULT_CHUNK_SIZE, DEFAULT_STUN_SERVER,
};

#[derive(Debug, Parser)]
#[command(name = "beam", version, about = "Direct peer-to-peer file transfer")]
pub struct Cli {
    /// Raise log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send one file; prints the code the receiver needs.
    Send {
        /// Source file.
        #[arg(long)]
        file: PathBuf,

        #[command(flatten)]
        options: TransferOptions,
    },

    /// Receive one file using the sender's code.
    Receive {
        /// Destination: an existing directory, or the file to create.
        #[arg(long)]
        dst: PathBuf,

        /// 8-character code; prompted for when omitted.
        #[arg(long)]
        code: Option<String>,

        #[command(flatten)]
        options: TransferOptions,
    },
}

#[derive(Debug, Args)]
pub struct TransferOptions {
    /// Maximum FILE_DATA payload in bytes.
    #[arg(long, env = "BEAM_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Flow-control resume threshold in bytes.
    #[arg(long, env = "BEAM_BUFFERED_LOW", default_value_t = DEFAULT_BUFFERED_LOW)]
    pub buffered_low: usize,

    /// Flow-control pause threshold in bytes.
    #[arg(long, env = "BEAM_BUFFERED_MAX", default_value_t = DEFAULT_BUFFERED_MAX)]
    pub buffered_max: usize,

    /// STUN/TURN endpoint; repeat or comma-separate for several.
    #[arg(long = "ice-server", env = "BEAM_ICE_SERVERS", value_delimiter = ',')]
    pub ice_servers: Vec<String>,

    /// Base URL of the rendezvous store.
    #[arg(long, env = "BEAM_RENDEZVOUS_URL")]
    pub rendezvous_url: String,

    /// Bearer credentials for the rendezvous store.
    #[arg(long, env = "BEAM_RENDEZVOUS_CREDS", hide_env_values = true)]
    pub rendezvous_creds: String,
}

impl TransferOptions {
    pub fn into_config(self) -> TransferConfig {
        let ice_servers = if self.ice_servers.is_empty() {
            vec![DEFAULT_STUN_SERVER.to_string()]
        } else {
            self.ice_servers
        };
        TransferConfig {
            chunk_size: self.chunk_size,
            buffered_low: self.buffered_low,
            buffered_max: self.buffered_max,
            ice_servers,
            rendezvous_url: self.rendezvous_url,
            rendezvous_creds: self.rendezvous_creds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn send_parses_with_defaults() {
        let cli = parse(&[
            "beam",
            "send",
            "--file",
            "/tmp/a.bin",
            "--rendezvous-url",
            "https://store.example",
            "--rendezvous-creds",
            "secret",
        ]);
        match cli.command {
            Command::Send { file, options } => {
                assert_eq!(file, PathBuf::from("/tmp/a.bin"));
                let config = options.into_config();
                assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
                assert_eq!(config.ice_servers, vec![DEFAULT_STUN_SERVER.to_string()]);
                assert!(config.validate().is_ok());
            }
            other => panic!("parsed as {other:?}"),
        }
    }

    #[test]
    fn receive_accepts_inline_code_and_overrides() {
        let cli = parse(&[
            "beam",
            "receive",
            "--dst",
            "/tmp/out",
            "--code",
            "AbCd1234",
            "--chunk-size",
            "65536",
            "--ice-server",
            "stun:one,stun:two",
            "--rendezvous-url",
            "https://store.example",
            "--rendezvous-creds",
            "secret",
        ]);
        match cli.command {
            Command::Receive { code, options, .. } => {
                assert_eq!(code.as_deref(), Some("AbCd1234"));
                let config = options.into_config();
                assert_eq!(config.chunk_size, 65536);
                assert_eq!(config.ice_servers, vec!["stun:one", "stun:two"]);
            }
            other => panic!("parsed as {other:?}"),
        }
    }

    #[test]
    fn missing_store_settings_fail_to_parse() {
        assert!(Cli::try_parse_from(["beam", "send", "--file", "/tmp/a"]).is_err());
    }
}
