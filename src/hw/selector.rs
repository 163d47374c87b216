use std::io::{self, BufRead, BufReader, Stderr, Stdin, Write};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::model::DiscoveredDevice;

/// Picks one device out of a scan result.
#[async_trait]
pub trait DeviceSelector: Send + Sync {
    /// Returns the chosen device address, or `None` to abort the session.
    async fn select(&self, devices: &[DiscoveredDevice]) -> Option<String>;
}

/// Selects the scanned device with a given address, ignoring case.
#[derive(Debug, Clone)]
pub struct AddressSelector {
    address: String,
}

impl AddressSelector {
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl DeviceSelector for AddressSelector {
    async fn select(&self, devices: &[DiscoveredDevice]) -> Option<String> {
        let found = devices
            .iter()
            .find(|device| device.address().eq_ignore_ascii_case(&self.address))
            .map(|device| device.address().to_string());
        if found.is_none() {
            info!(address = %self.address, "requested address was not in the scan result");
        }
        found
    }
}

/// Selects the first device in scan order.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstDeviceSelector;

#[async_trait]
impl DeviceSelector for FirstDeviceSelector {
    async fn select(&self, devices: &[DiscoveredDevice]) -> Option<String> {
        devices.first().map(|device| device.address().to_string())
    }
}

/// Selects the first device whose advertised name matches exactly, deferring
/// to a fallback selector otherwise.
pub struct PreferredNameSelector {
    name: String,
    fallback: Box<dyn DeviceSelector>,
}

impl PreferredNameSelector {
    #[must_use]
    pub fn new(name: impl Into<String>, fallback: Box<dyn DeviceSelector>) -> Self {
        Self {
            name: name.into(),
            fallback,
        }
    }
}

#[async_trait]
impl DeviceSelector for PreferredNameSelector {
    async fn select(&self, devices: &[DiscoveredDevice]) -> Option<String> {
        if let Some(device) = devices
            .iter()
            .find(|device| device.local_name() == Some(self.name.as_str()))
        {
            info!(name = %self.name, address = device.address(), "auto-selected preferred device");
            return Some(device.address().to_string());
        }

        info!(name = %self.name, "preferred device not found, falling back");
        self.fallback.select(devices).await
    }
}

/// One line of operator input to the selection prompt.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum SelectionInput {
    Index(usize),
    Abort,
    Invalid,
}

/// Interprets one prompt line against a list of `device_count` entries.
pub(crate) fn parse_selection(line: &str, device_count: usize) -> SelectionInput {
    let trimmed = line.trim();
    if trimmed.eq_ignore_ascii_case("q") || trimmed.eq_ignore_ascii_case("quit") {
        return SelectionInput::Abort;
    }
    match trimmed.parse::<usize>() {
        Ok(index) if index < device_count => SelectionInput::Index(index),
        _ => SelectionInput::Invalid,
    }
}

/// Interactive selector that lists devices and reads an index from input.
pub struct PromptSelector<R, W> {
    input: Arc<Mutex<R>>,
    output: Arc<Mutex<W>>,
}

impl PromptSelector<BufReader<Stdin>, Stderr> {
    /// Prompts on stderr and reads the answer from stdin.
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stderr())
    }
}

impl<R, W> PromptSelector<R, W>
where
    R: BufRead + Send + 'static,
    W: Write + Send + 'static,
{
    #[must_use]
    pub fn new(input: R, output: W) -> Self {
        Self {
            input: Arc::new(Mutex::new(input)),
            output: Arc::new(Mutex::new(output)),
        }
    }
}

#[async_trait]
impl<R, W> DeviceSelector for PromptSelector<R, W>
where
    R: BufRead + Send + 'static,
    W: Write + Send + 'static,
{
    async fn select(&self, devices: &[DiscoveredDevice]) -> Option<String> {
        let devices = devices.to_vec();
        let input = Arc::clone(&self.input);
        let output = Arc::clone(&self.output);

        // Runtime shutdown must never wait on a pending line read.
        let (sender, receiver) = oneshot::channel();
        let spawned = std::thread::Builder::new()
            .name("device-prompt".to_string())
            .spawn(move || {
                let answer = {
                    let mut input = input.lock().unwrap_or_else(PoisonError::into_inner);
                    let mut output = output.lock().unwrap_or_else(PoisonError::into_inner);
                    prompt(&mut *input, &mut *output, &devices)
                        .map(|index| index.map(|index| devices[index].address().to_string()))
                };
                if sender.send(answer).is_err() {
                    debug!("device selection answered after the session stopped waiting");
                }
            });
        if let Err(error) = spawned {
            warn!(%error, "failed to start device selection prompt");
            return None;
        }

        match receiver.await {
            Ok(Ok(choice)) => choice,
            Ok(Err(error)) => {
                warn!(%error, "device selection prompt failed");
                None
            }
            Err(_closed) => {
                warn!("device selection prompt ended without an answer");
                None
            }
        }
    }
}

fn prompt<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    devices: &[DiscoveredDevice],
) -> io::Result<Option<usize>> {
    writeln!(output, "Discovered devices:")?;
    for (index, device) in devices.iter().enumerate() {
        writeln!(
            output,
            "{index:2}: {:20} {}",
            device.display_name(),
            device.address()
        )?;
    }

    loop {
        write!(output, "Select device index (q to abort): ")?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        match parse_selection(&line, devices.len()) {
            SelectionInput::Index(index) => return Ok(Some(index)),
            SelectionInput::Abort => return Ok(None),
            SelectionInput::Invalid => writeln!(output, "Invalid choice.")?,
        }
    }
}
