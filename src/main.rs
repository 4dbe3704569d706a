// Copyright Istio Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::Context;
use netd::*;
use tracing::info;

fn main() -> anyhow::Result<()> {
    telemetry::setup_logging();
    let config = config::parse_config()?;

    // For now we don't need a complex CLI, so rather than pull in dependencies just use basic argv[1]
    match std::env::args().nth(1).as_deref() {
        None | Some("run") => (),
        Some("version") => return version(),
        Some("help") => return help(),
        Some(unknown) => {
            eprintln!("unknown command: {unknown}");
            help()?;
            std::process::exit(1)
        }
    };

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.num_worker_threads.max(1))
        .thread_name("netd-worker")
        .enable_all()
        .build()
        .context("failed to build runtime")?
        .block_on(async move { run(config).await })
}

fn help() -> anyhow::Result<()> {
    let version = version::BuildInfo::new();
    println!(
        "
{version}

Commands:
run (default) - Start the tethering and DNS proxy daemon
version       - Print the version of netd
help          - Print commands and version of netd"
    );
    Ok(())
}

fn version() -> anyhow::Result<()> {
    println!("{}", version::BuildInfo::new());
    Ok(())
}

async fn run(cfg: config::Config) -> anyhow::Result<()> {
    info!("version: {}", version::BuildInfo::new());
    info!("running with config: {}", serde_yaml::to_string(&cfg)?);
    app::build(cfg).await?.wait_termination().await
}
