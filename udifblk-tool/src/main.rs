//! udifblk-tool - inspect and read Apple DMG images as block devices
//!
//! # Usage
//!
//! ```text
//! udifblk-tool info <dmg> [flags]                       Trailer & chunk table summary
//! udifblk-tool chunks <dmg> [flags]                     List every chunk
//! udifblk-tool cat <dmg> [start-sector] [count] [flags] Logical sectors to stdout
//! udifblk-tool check <dmg> [flags]                      Decode every chunk
//!
//! Flags:
//!   --no-bzip2   open without a bzip2 decoder
//!   --no-lzfse   open without an LZFSE decoder
//!   --verify     verify the master checksum at open
//! ```
//!
//! Set `RUST_LOG=debug` (or `trace`) to follow parsing and decoding.

mod cmd_cat;
mod cmd_check;
mod cmd_info;
mod style;

use std::env;
use std::process;

use udifblk::{CodecRegistry, DmgImage, OpenOptions};

use style::{BOLD, DIM, GREEN, RED, RESET};

pub(crate) type CmdResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "info" => cmd_info::info(&args[2..]),
        "chunks" | "ls" => cmd_info::chunks(&args[2..]),
        "cat" => cmd_cat::run(&args[2..]).await,
        "check" => cmd_check::run(&args[2..]).await,
        "-h" | "--help" | "help" => {
            print_usage();
            Ok(())
        }
        _ => {
            eprintln!("{RED}Unknown command: {}{RESET}", args[1]);
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("{RED}error:{RESET} {e}");
        process::exit(1);
    }
}

/// Command arguments with the global flags split out
pub(crate) struct Invocation {
    pub path: String,
    pub positional: Vec<String>,
    pub options: OpenOptions,
}

impl Invocation {
    pub fn parse(args: &[String], usage: &str) -> Result<Self, String> {
        let mut bzip2 = true;
        let mut lzfse = true;
        let mut verify = false;
        let mut positional = Vec::new();

        for arg in args {
            match arg.as_str() {
                "--no-bzip2" => bzip2 = false,
                "--no-lzfse" => lzfse = false,
                "--verify" => verify = true,
                flag if flag.starts_with("--") => return Err(format!("Unknown flag: {flag}")),
                _ => positional.push(arg.clone()),
            }
        }

        if positional.is_empty() {
            return Err(format!("Usage: udifblk-tool {usage}"));
        }
        let path = positional.remove(0);

        let mut codecs = CodecRegistry::builder();
        if bzip2 {
            codecs = codecs.with_bzip2();
        }
        if lzfse {
            codecs = codecs.with_lzfse();
        }
        let options = OpenOptions::new()
            .codecs(codecs.build())
            .verify_checksums(verify);

        Ok(Invocation {
            path,
            positional,
            options,
        })
    }

    pub fn open(&self) -> Result<DmgImage<std::fs::File>, udifblk::OpenError> {
        DmgImage::open_path(&self.path, self.options.clone())
    }

    /// Positional argument `index` parsed as a number, if present
    pub fn number(&self, index: usize, what: &str) -> Result<Option<u64>, String> {
        self.positional
            .get(index)
            .map(|s| s.parse().map_err(|_| format!("Invalid {what}: {s}")))
            .transpose()
    }
}

fn print_usage() {
    eprintln!(
        r#"
{BOLD}udifblk-tool{RESET} - Apple DMG block device reader

{DIM}Reads UDIF images as flat arrays of 512-byte sectors{RESET}

{BOLD}USAGE:{RESET}
    udifblk-tool <COMMAND> <dmg> [ARGS] [FLAGS]

{BOLD}COMMANDS:{RESET}
    {GREEN}info{RESET}      <dmg>                      Trailer & compression summary
    {GREEN}chunks{RESET}    <dmg>                      List the chunk table
    {GREEN}cat{RESET}       <dmg> [start] [count]      Logical sectors to stdout
    {GREEN}check{RESET}     <dmg>                      Decode every chunk and report failures

{BOLD}FLAGS:{RESET}
    --no-bzip2    Open without a bzip2 decoder
    --no-lzfse    Open without an LZFSE decoder
    --verify      Verify the trailer's master checksum

{BOLD}EXAMPLES:{RESET}
    udifblk-tool info Kernel_Debug_Kit.dmg
    udifblk-tool cat Kernel_Debug_Kit.dmg 0 8 | xxd | head
    RUST_LOG=debug udifblk-tool check --verify Kernel_Debug_Kit.dmg
"#
    );
}
