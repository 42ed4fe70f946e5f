// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Herald bulk email dispatch binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod app;
mod control;
mod version;

use app::{App, SendOptions};
use control::ControlResponse;
use herald_smtp::SmtpMailer;

/// Herald - paced bulk email dispatch inside office hours.
#[derive(Parser, Debug)]
#[command(name = "herald", about = "Paced bulk email dispatch", version)]
struct Args {
	/// Config file (defaults to /etc/herald/herald.toml)
	#[arg(long, global = true, env = "HERALD_CONFIG")]
	config: Option<PathBuf>,

	/// Defaults to `run`
	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Resume persisted jobs and keep dispatching until Ctrl-C
	Run,
	/// Start a bulk send; hands it to a running herald when there is one
	Send(SendArgs),
	/// Stop a job and delete its record
	Cancel {
		/// Job id as printed by `send` or `jobs`
		id: String,
	},
	/// Print persisted job summaries as JSON
	Jobs,
	/// Print configured accounts and the result of a login attempt
	Accounts,
	/// Show version and build information
	Version,
}

#[derive(clap::Args, Debug)]
struct SendArgs {
	/// Recipient source file name inside the sources directory
	#[arg(long)]
	source: String,

	#[arg(long)]
	subject: String,

	/// HTML file with the message body
	#[arg(long)]
	body: PathBuf,

	/// Sending address; the first configured account when omitted
	#[arg(long)]
	from: Option<String>,

	#[arg(long, default_value_t = 25)]
	batch_size: u32,

	/// Pause between batches
	#[arg(long, default_value_t = 15)]
	interval_minutes: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	if let Some(Command::Version) = args.command {
		println!("{}", version::format_version_info());
		return Ok(());
	}

	dotenvy::dotenv().ok();

	let config = match &args.config {
		Some(path) => herald_config::load_config_with_file(path)?,
		None => herald_config::load_config()?,
	};

	tracing_subscriber::registry()
		.with(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| config.logging.level.clone().into()),
		)
		.with(tracing_subscriber::fmt::layer())
		.init();

	if let Some(Command::Jobs) = args.command {
		let summaries = app::persisted_summaries(&config.paths.jobs_dir).await?;
		println!("{}", serde_json::to_string_pretty(&summaries)?);
		return Ok(());
	}

	let command = args.command.unwrap_or(Command::Run);
	let jobs_dir = config.paths.jobs_dir.clone();

	match command {
		Command::Accounts => {
			let mailer = SmtpMailer::new(&config.mail, &config.paths.uploads_dir)?;
			let accounts: Vec<serde_json::Value> = mailer
				.accounts()
				.into_iter()
				.map(|account| serde_json::json!({ "key": account.key, "address": account.address }))
				.collect();
			let credentials = app::check_credentials(&mailer).await;
			let report = serde_json::json!({ "accounts": accounts, "credentials": credentials });
			println!("{}", serde_json::to_string_pretty(&report)?);
			return Ok(());
		}
		Command::Cancel { id } => {
			match app::cancel(&jobs_dir, id.into()).await? {
				ControlResponse::Cancelled { id } => {
					tracing::info!(job_id = %id, "Job cancelled");
					println!("{id}");
				}
				ControlResponse::NotFound { id } => return Err(format!("job {id} not found").into()),
				ControlResponse::Error { message } => return Err(message.into()),
				other => return Err(format!("unexpected control response: {other:?}").into()),
			}
			return Ok(());
		}
		Command::Send(send) => {
			let html_body = tokio::fs::read_to_string(&send.body).await?;
			let options = SendOptions {
				source_id: send.source,
				subject: send.subject,
				html_body,
				from_address: send.from,
				batch_size: send.batch_size,
				interval_minutes: send.interval_minutes,
			};

			if let Some(id) = app::submit_to_running(&jobs_dir, options.clone().into_request()).await? {
				tracing::info!(job_id = %id, "Job handed to running herald");
				println!("{id}");
				return Ok(());
			}

			let app = App::build(config)?;
			app.check_credentials().await;
			// Own the directory now, so interrupted jobs are ours to resume.
			app.manager.recover().await?;

			let id = app.submit(options).await?;
			tracing::info!(job_id = %id, "Job submitted");
			println!("{id}");

			tokio::select! {
				finished = app.wait_for_all() => {
					tracing::info!(jobs = finished.len(), "All jobs finished");
				}
				result = app.serve_control() => {
					tracing::error!(error = ?result, "Control socket stopped");
				}
				_ = tokio::signal::ctrl_c() => {
					tracing::info!("Received shutdown signal");
				}
			}
			app.manager.shutdown().await;
		}
		Command::Run => {
			let app = App::build(config)?;
			tracing::info!(
				jobs_dir = %app.config.paths.jobs_dir.display(),
				sources_dir = %app.config.paths.sources_dir.display(),
				"starting herald"
			);
			app.check_credentials().await;
			app.manager.recover().await?;

			tokio::select! {
				result = app.serve_control() => {
					tracing::error!(error = ?result, "Control socket stopped");
				}
				signal = tokio::signal::ctrl_c() => {
					signal?;
					tracing::info!("Received shutdown signal");
				}
			}
			app.manager.shutdown().await;
		}
		Command::Jobs | Command::Version => {}
	}

	tracing::info!("Herald shutdown complete");
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use clap::CommandFactory;

	#[test]
	fn cli_definition_is_consistent() {
		Args::command().debug_assert();
	}

	#[test]
	fn no_subcommand_means_run() {
		let args = Args::try_parse_from(["herald"]).unwrap();
		assert!(args.command.is_none());
	}

	#[test]
	fn parses_send_with_defaults() {
		let args = Args::try_parse_from([
			"herald",
			"--config",
			"/tmp/herald.toml",
			"send",
			"--source",
			"leads.csv",
			"--subject",
			"Autumn offer",
			"--body",
			"offer.html",
		])
		.unwrap();

		assert_eq!(args.config, Some(PathBuf::from("/tmp/herald.toml")));
		match args.command {
			Some(Command::Send(send)) => {
				assert_eq!(send.source, "leads.csv");
				assert_eq!(send.from, None);
				assert_eq!(send.batch_size, 25);
				assert_eq!(send.interval_minutes, 15);
			}
			other => panic!("unexpected command: {other:?}"),
		}
	}

	#[test]
	fn parses_cancel_with_job_id() {
		let args = Args::try_parse_from(["herald", "cancel", "3f2a"]).unwrap();
		match args.command {
			Some(Command::Cancel { id }) => assert_eq!(id, "3f2a"),
			other => panic!("unexpected command: {other:?}"),
		}
	}

	#[test]
	fn cancel_requires_job_id() {
		assert!(Args::try_parse_from(["herald", "cancel"]).is_err());
	}

	#[test]
	fn send_requires_source() {
		let result = Args::try_parse_from(["herald", "send", "--subject", "x", "--body", "b.html"]);
		assert!(result.is_err());
	}
}
