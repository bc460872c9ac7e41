// Copyright (c) The deqp-runner Contributors
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use color_eyre::Result;
use deqp_run::DeqpRunApp;

fn main() -> Result<()> {
    color_eyre::install()?;

    let app = DeqpRunApp::parse();
    let output = app.init_output();

    match app.exec(output) {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            error.display_to_stderr(&output.stderr_styles());
            std::process::exit(error.process_exit_code())
        }
    }
}
