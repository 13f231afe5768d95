//! Subcommand dispatch

use crate::cli::args::{Args, Command};
use crate::config::{PushConfig, RegistryConfig};
use crate::error::{RegistryError, Result};
use crate::image::inspect::inspect_docker_tar;
use crate::image::tags::extract_original_tags;
use crate::image::validator::validate_docker_tar;
use crate::logging::Logger;
use crate::push::ImagePusher;
use crate::registry::{ProgressTracker, RegistryClient, RegistryClientBuilder};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

pub struct Runner {
    args: Args,
    output: Logger,
}

impl Runner {
    pub fn new(args: Args) -> Result<Self> {
        let output = if args.quiet {
            Logger::new_quiet()
        } else {
            Logger::new(args.verbose)
        };

        Ok(Self { args, output })
    }

    pub async fn run(&self) -> Result<()> {
        self.args.validate().map_err(RegistryError::Config)?;

        match &self.args.command {
            Command::Push {
                file,
                repository,
                tag,
                all_tags,
                concurrency,
                chunk_size,
            } => {
                let config = PushConfig::default()
                    .with_concurrency(*concurrency)
                    .with_chunk_size(*chunk_size);
                self.push(file, repository.as_deref(), tag.as_deref(), *all_tags, config)
                    .await
            }
            Command::Tags { file } => self.tags(file).await,
            Command::Validate { file } => self.validate(file).await,
            Command::Inspect { file } => {
                let path = Path::new(file).to_path_buf();
                let inspect = tokio::task::spawn_blocking(move || inspect_docker_tar(&path)).await??;
                print_json(&inspect)
            }
            Command::ListRepos => {
                let repositories = self.client()?.list_repositories().await?;
                self.print_list("Repositories", &repositories);
                Ok(())
            }
            Command::ListTags { repository } => {
                let tags = self.client()?.list_tags(repository).await?;
                self.print_list(&format!("Tags in {}", repository), &tags);
                Ok(())
            }
            Command::Manifest {
                repository,
                reference,
            } => {
                let manifest = self.client()?.get_manifest(repository, reference).await?;
                print_json(&manifest)
            }
            Command::ImageInfo { repository, tag } => {
                let info = self.client()?.get_image_info(repository, tag).await?;
                print_json(&info)
            }
            Command::Delete {
                repository,
                tag,
                digest,
            } => {
                let client = self.client()?;
                let deleted = match (tag, digest) {
                    (_, Some(digest)) => client.delete_image_by_digest(repository, digest).await?,
                    (Some(tag), None) => client.delete_image(repository, tag).await?,
                    (None, None) => {
                        return Err(RegistryError::InvalidInput(
                            "Either a tag or --digest is required".to_string(),
                        ));
                    }
                };
                println!("{}", deleted);
                Ok(())
            }
        }
    }

    fn client(&self) -> Result<RegistryClient> {
        RegistryClientBuilder::new(RegistryConfig::new(&self.args.registry_url).with_timeout(self.args.timeout))
            .with_logger(self.output.clone())
            .build()
    }

    /// Decorated list normally, bare lines in quiet mode
    fn print_list(&self, title: &str, items: &[String]) {
        if self.args.quiet {
            print_lines(items);
        } else {
            self.output.list(title, items);
        }
    }

    async fn push(
        &self,
        file: &str,
        repository: Option<&str>,
        tag: Option<&str>,
        all_tags: bool,
        config: PushConfig,
    ) -> Result<()> {
        self.output.section("Docker Tar Pusher");
        self.output.summary_kv(
            "Settings",
            &[
                ("Archive", file.to_string()),
                ("Registry", self.args.registry_url.clone()),
                ("Concurrency", config.concurrent_uploads.to_string()),
                ("Chunk size", self.output.format_size(config.chunk_size as u64)),
            ],
        );

        let pusher = ImagePusher::new(self.client()?, config)
            .with_logger(self.output.clone())
            .with_progress(Arc::new(ProgressTracker::new(self.output.clone())));

        if all_tags {
            let digests = pusher.push_with_all_original_tags(file).await?;
            for digest in &digests {
                println!("{}", digest);
            }
        } else {
            let digest = pusher.push_tar(file, repository, tag).await?;
            println!("{}", digest);
        }

        self.output.success(&format!(
            "Operation completed successfully in {}",
            self.output.format_duration(self.output.elapsed())
        ));
        Ok(())
    }

    async fn tags(&self, file: &str) -> Result<()> {
        let path = Path::new(file).to_path_buf();
        let tags = tokio::task::spawn_blocking(move || extract_original_tags(&path)).await??;
        if tags.is_empty() {
            self.output.warning("No original tags found in archive");
        }
        print_lines(&tags);
        Ok(())
    }

    async fn validate(&self, file: &str) -> Result<()> {
        let path = Path::new(file).to_path_buf();
        let valid = tokio::task::spawn_blocking(move || validate_docker_tar(&path)).await??;
        if valid {
            self.output.success(&format!("{} is a valid image archive", file));
            Ok(())
        } else {
            Err(RegistryError::Validation(format!("Invalid Docker tar file: {}", file)))
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{}", line);
    }
}
