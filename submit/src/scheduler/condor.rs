use super::SchedulerError;
use crate::{
    bunch::{Bunch, Template},
    shell::{quote, Shell},
    submission::DescriptorOptions,
};
use std::path::Path;
use tracing::{error, info};

/// Hands descriptors to HTCondor through `condor_submit`
#[derive(Debug, Clone)]
pub struct CondorScheduler {
    command: String,
    batch_name: String,
    options: DescriptorOptions,
    shell: Shell,
}

impl CondorScheduler {
    pub fn new(command: String, batch_name: String, options: DescriptorOptions, shell: Shell) -> Self {
        Self {
            command,
            batch_name,
            options,
            shell,
        }
    }

    pub fn options(&self) -> &DescriptorOptions {
        &self.options
    }

    pub fn submit_command(&self, descriptor: &Path, bunch: Bunch) -> String {
        format!(
            "{} {} -batch-name {}",
            self.command,
            quote(&descriptor.to_string_lossy()),
            quote(&bunch.resolve(Template::BatchName, &self.batch_name))
        )
    }

    pub fn submit(&self, descriptor: &Path, bunch: Bunch) -> Result<(), SchedulerError> {
        let output = self.shell.run(&self.submit_command(descriptor, bunch))?;

        if !output.success() {
            let combined = output.combined();
            error!(status = ?output.status, output = %combined, "condor_submit failed");

            return Err(SchedulerError::SubmitFailed {
                status: output.status,
                output: combined,
            });
        }

        info!(output = %output.stdout.trim(), "Submitted jobs");
        Ok(())
    }
}
