// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

pub mod click;
pub mod error;
pub mod manager;
pub mod matchmap;
pub mod utils;

use crate::click::{ControlSocket, UeMapPoller};
use crate::manager::{AgentConfig, ManagerAgent};
use crate::matchmap::{IptablesNatChain, MatchMap};

use clap::Parser;
use log::info;
use serde::Serialize;
use signal_hook::consts::signal::{SIGINT, SIGQUIT, SIGTERM};
use std::fs::File;
use std::sync::{atomic::AtomicBool, Arc};
use structured_logger::json::new_writer;

#[derive(Debug, Parser, Serialize)]
#[command(name = "upf-service-agent", version, about, long_about = None)]
pub struct Options {
    /// Directory to write the agent log to, instead of stdout
    #[clap(short, long, default_value = "")]
    logdir: String,

    /// UPF service manager address
    #[clap(short = 'm', long, default_value = "127.0.0.1")]
    manager_addr: String,

    /// UPF service manager port
    #[clap(short = 'P', long, default_value_t = 7000)]
    manager_port: u16,

    /// Seconds between hello messages to the manager
    #[clap(short = 'e', long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..=600))]
    hello_secs: u64,

    /// Forwarding engine control-socket address
    #[clap(short = 'a', long, default_value = "127.0.0.1")]
    click_addr: String,

    /// Forwarding engine control-socket port
    #[clap(short = 'p', long, default_value_t = 7777)]
    click_port: u16,

    /// Click element owning the matchmap and uemap handlers
    #[clap(short = 'c', long, default_value = "upfr")]
    click_element: String,

    /// Subnet whose traffic is steered through the agent NAT chain
    #[clap(short = 's', long, default_value = "10.0.0.0/8")]
    ue_subnet: String,

    /// Seconds between UE session-table polls
    #[clap(short = 'u', long, default_value_t = 2, value_parser = clap::value_parser!(u64).range(1..=600))]
    poll_secs: u64,

    /// Seconds by which the poll period can vary
    #[clap(short = 'j', long, default_value_t = 0, value_parser = clap::value_parser!(u64).range(0..=600))]
    poll_jitter_secs: u64,
}

pub fn on_load(opt: Options) -> Result<(), anyhow::Error> {
    init_logging(&opt.logdir)?;
    info!(args:serde = opt; "Starting up");

    // Register POSIX signals for which we want to exit gracefully.
    let should_exit = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGINT, Arc::clone(&should_exit))?;
    signal_hook::flag::register(SIGQUIT, Arc::clone(&should_exit))?;
    signal_hook::flag::register(SIGTERM, Arc::clone(&should_exit))?;

    let click = ControlSocket::new(
        opt.click_addr.clone(),
        opt.click_port,
        opt.click_element.clone(),
    );
    let nat = IptablesNatChain::new()?;
    let matchmap = Arc::new(MatchMap::new(
        click.clone(),
        nat,
        opt.ue_subnet.clone(),
        Arc::clone(&should_exit),
    ));

    // Nothing is served until the engine is up and both stores are empty.
    matchmap.start()?;

    let agent = ManagerAgent::new(
        AgentConfig {
            manager_addr: format!("{}:{}", opt.manager_addr, opt.manager_port),
            hello_secs: opt.hello_secs,
            poll_secs: opt.poll_secs,
            poll_jitter_secs: opt.poll_jitter_secs,
        },
        matchmap,
        UeMapPoller::new(click),
        should_exit,
    );
    agent.run();

    info!("Exiting");
    Ok(())
}

// Logging goes to stdout as JSON lines, or to <logdir>/agent.log when a log
// directory is configured. Log level can be set via env var RUST_LOG, and
// defaults to info.
fn init_logging(logdir: &str) -> Result<(), anyhow::Error> {
    let builder = structured_logger::Builder::new();
    if logdir.is_empty() {
        builder
            .with_default_writer(new_writer(std::io::stdout()))
            .init();
    } else {
        let file = File::create(format!("{logdir}/agent.log"))?;
        builder.with_default_writer(new_writer(file)).init();
    }
    Ok(())
}
