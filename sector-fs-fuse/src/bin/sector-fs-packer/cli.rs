use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(version, about = "Build and inspect sector-fs images")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Pack the regular files of a host directory into a fresh image
    Pack {
        /// Host source directory
        #[arg(long, short)]
        source: PathBuf,

        /// Output image file
        #[arg(long, short)]
        image: PathBuf,

        /// Image size in sectors
        #[arg(long, default_value_t = 16 * 2048)]
        sectors: u32,

        /// Directory inside the image receiving the files, created if missing
        #[arg(long, short, default_value = "/")]
        dest: String,
    },

    /// List a directory inside an image
    Ls {
        #[arg(long, short)]
        image: PathBuf,

        #[arg(default_value = "/")]
        path: String,
    },

    /// Write a file inside an image to stdout
    Cat {
        #[arg(long, short)]
        image: PathBuf,

        path: String,
    },
}
