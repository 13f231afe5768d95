//! Command-line argument parsing

use crate::config::{DEFAULT_CHUNK_SIZE, DEFAULT_CONCURRENT_UPLOADS, DEFAULT_PUSH_TIMEOUT};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "docker-tar-pusher")]
#[command(about = "Push docker-save tar archives to a Docker Registry v2 endpoint")]
#[command(version, author)]
pub struct Args {
    /// Registry base URL
    #[arg(
        long = "registry-url",
        short = 'r',
        global = true,
        default_value = "http://localhost:5000",
        help = "Registry base URL, e.g. http://localhost:5000"
    )]
    pub registry_url: String,

    /// Timeout in seconds for network operations
    #[arg(
        long = "timeout",
        short = 't',
        global = true,
        default_value_t = DEFAULT_PUSH_TIMEOUT,
        help = "Timeout for each registry request in seconds"
    )]
    pub timeout: u64,

    #[arg(long = "verbose", short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(
        long = "quiet",
        short = 'q',
        global = true,
        conflicts_with = "verbose",
        help = "Only print results and errors"
    )]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Push an image archive
    Push {
        #[arg(help = "Path to the image tar archive")]
        file: String,

        #[arg(
            long = "repository",
            help = "Target repository; defaults to the archive's first RepoTag"
        )]
        repository: Option<String>,

        #[arg(long = "tag", help = "Target tag; defaults to the archive's first RepoTag")]
        tag: Option<String>,

        #[arg(
            long = "all-tags",
            conflicts_with_all = ["repository", "tag"],
            help = "Push under every original tag found in the archive"
        )]
        all_tags: bool,

        #[arg(
            long = "concurrency",
            short = 'j',
            default_value_t = DEFAULT_CONCURRENT_UPLOADS,
            help = "Number of blobs uploaded at once"
        )]
        concurrency: usize,

        #[arg(
            long = "chunk-size",
            short = 'c',
            default_value_t = DEFAULT_CHUNK_SIZE,
            help = "Upload chunk size in bytes"
        )]
        chunk_size: usize,
    },

    /// Print the original repository:tag pairs stored in an archive
    Tags {
        #[arg(help = "Path to the image tar archive")]
        file: String,
    },

    /// Check an archive's structure
    Validate {
        #[arg(help = "Path to the image tar archive")]
        file: String,
    },

    /// Print an archive's image metadata as JSON
    Inspect {
        #[arg(help = "Path to the image tar archive")]
        file: String,
    },

    /// List repositories in the registry catalog
    ListRepos,

    /// List tags of a repository
    ListTags {
        repository: String,
    },

    /// Print a manifest as JSON
    Manifest {
        repository: String,
        #[arg(default_value = "latest")]
        reference: String,
    },

    /// Print a summary of a pushed image
    ImageInfo {
        repository: String,
        #[arg(default_value = "latest")]
        tag: String,
    },

    /// Delete a manifest by tag or digest
    Delete {
        repository: String,

        #[arg(required_unless_present = "digest", help = "Tag whose manifest is deleted")]
        tag: Option<String>,

        #[arg(long = "digest", conflicts_with = "tag", help = "Manifest digest to delete")]
        digest: Option<String>,
    },
}

impl Args {
    pub fn parse_args() -> Self {
        Args::parse()
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.registry_url.starts_with("http://") && !self.registry_url.starts_with("https://") {
            return Err("Registry URL must start with http:// or https://".to_string());
        }

        if self.timeout == 0 {
            return Err("Timeout must be greater than 0".to_string());
        }

        match &self.command {
            Command::Push {
                file,
                concurrency,
                chunk_size,
                ..
            } => {
                check_file(file)?;
                if *concurrency == 0 {
                    return Err("Concurrency must be greater than 0".to_string());
                }
                if *chunk_size == 0 {
                    return Err("Chunk size must be greater than 0".to_string());
                }
            }
            Command::Tags { file } | Command::Validate { file } | Command::Inspect { file } => {
                check_file(file)?;
            }
            _ => {}
        }

        Ok(())
    }

    pub fn print_examples() {
        println!("Examples:");
        println!("  # Push under the tag recorded in the archive");
        println!("  docker-tar-pusher -r http://localhost:5000 push nginx.tar");
        println!();
        println!("  # Push under an explicit name");
        println!("  docker-tar-pusher -r http://localhost:5000 push app.tar --repository team/app --tag v2");
        println!();
        println!("  # Push once and write every original tag");
        println!("  docker-tar-pusher push nginx.tar --all-tags -j 6 --verbose");
        println!();
        println!("  # Look around the registry");
        println!("  docker-tar-pusher list-repos");
        println!("  docker-tar-pusher image-info nginx alpine");
        println!();
        println!("  # Settings from the environment");
        println!("  export TAR_PUSHER_REGISTRY_URL=http://registry.internal:5000");
        println!("  export TAR_PUSHER_CONCURRENCY=8");
        println!("  docker-tar-pusher push app.tar");
    }

    /// Apply `TAR_PUSHER_*` environment overrides
    pub fn from_env(self) -> Self {
        self.with_env(|key| std::env::var(key).ok())
    }

    /// Overrides taken from `lookup`, which maps a variable name to its value
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup("TAR_PUSHER_REGISTRY_URL") {
            self.registry_url = url;
        }

        if let Some(timeout) = lookup("TAR_PUSHER_TIMEOUT").and_then(|t| t.parse().ok()) {
            self.timeout = timeout;
        }

        if let Command::Push {
            concurrency,
            chunk_size,
            ..
        } = &mut self.command
        {
            if let Some(c) = lookup("TAR_PUSHER_CONCURRENCY").and_then(|c| c.parse().ok()) {
                *concurrency = c;
            }
            if let Some(c) = lookup("TAR_PUSHER_CHUNK_SIZE").and_then(|c| c.parse().ok()) {
                *chunk_size = c;
            }
        }

        if lookup("TAR_PUSHER_VERBOSE").is_some() {
            self.verbose = true;
            self.quiet = false;
        }

        self
    }
}

fn check_file(file: &str) -> Result<(), String> {
    if std::path::Path::new(file).exists() {
        Ok(())
    } else {
        Err(format!("File does not exist: {}", file))
    }
}
