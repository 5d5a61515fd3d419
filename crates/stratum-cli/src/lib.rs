//! Library side of the `stratum` command-line tool

pub mod commands;
pub mod config;
pub mod output;

pub use config::CliConfig;
pub use output::OutputFormat;

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the entries of a pack
    List {
        /// Pack file
        pack: PathBuf,

        /// Only show entries matching this wildcard
        #[arg(short, long)]
        wildcard: Option<String>,
    },

    /// Write one entry of a pack to stdout or a file
    Cat {
        /// Pack file
        pack: PathBuf,

        /// Entry name
        name: String,

        /// Write to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Build a pack from a directory tree
    Build {
        /// Directory to pack
        dir: PathBuf,

        /// Pack file to write
        out: PathBuf,

        /// Compress entries with LZMA
        #[arg(long)]
        lzma: bool,

        /// Copy this many leading bytes of each stored entry into a preload section
        #[arg(long, value_name = "BYTES")]
        preload: Option<usize>,

        /// Compress the preload chunks
        #[arg(long, requires = "preload")]
        compress_preload: bool,

        /// Always write Zip64 end records
        #[arg(long)]
        zip64: bool,
    },

    /// Show which mount provides a name
    Resolve {
        /// Directories, packs or level files to mount, first wins
        #[arg(short, long = "mount", required = true)]
        mounts: Vec<PathBuf>,

        /// Path ID the mounts are added under
        #[arg(long, default_value = "GAME")]
        path_id: String,

        /// Name to resolve
        name: String,
    },

    /// Enumerate names matching a wildcard across mounts
    Find {
        /// Directories, packs or level files to mount, first wins
        #[arg(short, long = "mount", required = true)]
        mounts: Vec<PathBuf>,

        /// Path ID the mounts are added under
        #[arg(long, default_value = "GAME")]
        path_id: String,

        /// Path ID to search; `BSP` searches the level pack
        #[arg(long)]
        search_id: Option<String>,

        /// Wildcard such as `materials/*.vmt`
        wildcard: String,
    },

    /// Run a queued level load without consuming the data
    Load {
        /// Game directory holding `reslists/` and `maps/`
        game_dir: PathBuf,

        /// Level name
        level: String,

        /// Load HDR resources
        #[arg(long)]
        hdr: bool,

        /// Append the manifest supplement for this locale
        #[arg(long)]
        locale: Option<String>,

        /// Extra extensions to read as anonymous resources
        #[arg(long = "anonymous", value_name = "EXT")]
        anonymous_extensions: Vec<String>,

        /// Log every job after the load
        #[arg(long)]
        verbose_stats: bool,
    },
}

/// Run one command
pub fn run(command: Commands, config: &CliConfig, format: OutputFormat) -> anyhow::Result<()> {
    match command {
        Commands::List { pack, wildcard } => {
            commands::pack::list(&pack, wildcard.as_deref(), config, format)
        }
        Commands::Cat { pack, name, output } => {
            commands::pack::cat(&pack, &name, output.as_deref(), config)
        }
        Commands::Build {
            dir,
            out,
            lzma,
            preload,
            compress_preload,
            zip64,
        } => commands::pack::build(
            &dir,
            &out,
            &commands::pack::BuildOptions {
                lzma,
                preload,
                compress_preload,
                zip64,
            },
            format,
        ),
        Commands::Resolve {
            mounts,
            path_id,
            name,
        } => commands::vfs::resolve(&mounts, &path_id, &name, config, format),
        Commands::Find {
            mounts,
            path_id,
            search_id,
            wildcard,
        } => commands::vfs::find(
            &mounts,
            &path_id,
            search_id.as_deref(),
            &wildcard,
            config,
            format,
        ),
        Commands::Load {
            game_dir,
            level,
            hdr,
            locale,
            anonymous_extensions,
            verbose_stats,
        } => commands::load::run(
            &game_dir,
            &level,
            &commands::load::LoadArgs {
                hdr,
                locale,
                anonymous_extensions,
                verbose_stats,
            },
            config,
            format,
        ),
    }
}
