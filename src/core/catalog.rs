use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use anyhow::Context;
use tracing::debug;

use crate::decode::decoder::signal_bit_positions;
use crate::error::{IcError, Result};

/// DBC files mark 29-bit identifiers by setting bit 31
const DBC_EXTENDED_ID_FLAG: u32 = 0x8000_0000;

/// Largest payload a CAN FD frame can carry
pub const MAX_PAYLOAD_LEN: usize = 64;

/// Dense index of a signal inside a [`Catalog`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignalId(usize);

impl SignalId {
    pub fn from_index(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The immutable vehicle definition: every message and the signals it carries
///
/// Signals are owned here for the life of the process. Everything else (the
/// store, widgets, the ID resolver) refers to them by [`SignalId`] or message
/// index, never by copy.
#[derive(Debug, Clone)]
pub struct Catalog {
    messages: Vec<MessageDefinition>,
    /// SignalId -> (message index, signal index within message)
    locations: Vec<(usize, usize)>,
    by_name: HashMap<String, SignalId>,
}

impl Catalog {
    /// Build a catalog from message definitions
    ///
    /// Fails when signal names collide, a bit layout is impossible, or a
    /// multiplexed signal has no resolvable multiplexor. Duplicate message IDs
    /// are accepted here and flagged by the ID resolver and [`Catalog::validate`].
    pub fn new(mut messages: Vec<MessageDefinition>) -> Result<Self> {
        let mut locations = Vec::new();
        let mut by_name = HashMap::new();

        for (msg_idx, message) in messages.iter_mut().enumerate() {
            if message.size as usize > MAX_PAYLOAD_LEN {
                return Err(IcError::InvalidCatalog(format!(
                    "message '{}' declares {} bytes, more than {}",
                    message.name, message.size, MAX_PAYLOAD_LEN
                )));
            }

            message.first_signal = locations.len();
            resolve_multiplexors(message)?;

            for (sig_idx, signal) in message.signals.iter_mut().enumerate() {
                if signal.bit_length == 0 || signal.bit_length > 64 {
                    return Err(IcError::InvalidCatalog(format!(
                        "signal '{}' has invalid bit length {}",
                        signal.name, signal.bit_length
                    )));
                }
                if signal.start_bit as usize >= MAX_PAYLOAD_LEN * 8 {
                    return Err(IcError::InvalidCatalog(format!(
                        "signal '{}' starts at bit {}, outside any frame",
                        signal.name, signal.start_bit
                    )));
                }
                if signal.factor == 0.0 || !signal.factor.is_finite() {
                    return Err(IcError::InvalidCatalog(format!(
                        "signal '{}' has unusable factor {}",
                        signal.name, signal.factor
                    )));
                }

                signal.message_id = message.id;
                let id = SignalId(locations.len());
                if by_name.insert(signal.name.clone(), id).is_some() {
                    return Err(IcError::InvalidCatalog(format!(
                        "duplicate signal name '{}' (message '{}')",
                        signal.name, message.name
                    )));
                }
                locations.push((msg_idx, sig_idx));
            }
        }

        debug!(
            "Catalog built: {} messages, {} signals",
            messages.len(),
            locations.len()
        );

        Ok(Self {
            messages,
            locations,
            by_name,
        })
    }

    /// Parse a JSON array of message definitions
    pub fn from_json(content: &str) -> Result<Self> {
        let messages: Vec<MessageDefinition> = serde_json::from_str(content)
            .map_err(|e| IcError::InvalidCatalog(format!("bad JSON catalog: {}", e)))?;
        Self::new(messages)
    }

    /// Load a catalog from disk: `.dbc` files are parsed as DBC, anything else as JSON
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog file: {:?}", path))?;

        let is_dbc = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("dbc"))
            .unwrap_or(false);

        let catalog = if is_dbc {
            Self::parse_dbc(&content)
        } else {
            Self::from_json(&content)
        };
        catalog.with_context(|| format!("Failed to build catalog from {:?}", path))
    }

    /// Parse DBC text (`BO_`, `SG_` and `SG_MUL_VAL_` lines)
    pub fn parse_dbc(content: &str) -> Result<Self> {
        let mut messages: Vec<MessageDefinition> = Vec::new();
        // (message id, signal name, multiplexor name) from SG_MUL_VAL_
        let mut mux_links: Vec<(u32, String, String)> = Vec::new();

        for (line_idx, line) in content.lines().enumerate() {
            let line = line.trim();

            if line.starts_with("BO_ ") {
                let msg = parse_message_line(line).ok_or_else(|| {
                    IcError::InvalidCatalog(format!("line {}: malformed BO_ entry", line_idx + 1))
                })?;
                messages.push(msg);
            } else if line.starts_with("SG_ ") {
                let signal = parse_signal_line(line).ok_or_else(|| {
                    IcError::InvalidCatalog(format!("line {}: malformed SG_ entry", line_idx + 1))
                })?;
                let msg = messages.last_mut().ok_or_else(|| {
                    IcError::InvalidCatalog(format!(
                        "line {}: signal '{}' outside of any message",
                        line_idx + 1,
                        signal.name
                    ))
                })?;
                msg.signals.push(signal);
            } else if line.starts_with("SG_MUL_VAL_ ") {
                if let Some(link) = parse_mul_val_line(line) {
                    mux_links.push(link);
                }
            }
        }

        for (msg_id, signal_name, mux_name) in mux_links {
            let signal = messages
                .iter_mut()
                .filter(|m| m.id == msg_id)
                .flat_map(|m| m.signals.iter_mut())
                .find(|s| s.name == signal_name);
            if let Some(signal) = signal {
                signal.multiplex.set_multiplexor(mux_name);
            }
        }

        Self::new(messages)
    }

    pub fn messages(&self) -> &[MessageDefinition] {
        &self.messages
    }

    pub fn message(&self, index: usize) -> Option<&MessageDefinition> {
        self.messages.get(index)
    }

    pub fn signal_count(&self) -> usize {
        self.locations.len()
    }

    /// Look up a signal definition by ID
    pub fn signal(&self, id: SignalId) -> Option<&SignalDefinition> {
        let (msg_idx, sig_idx) = *self.locations.get(id.0)?;
        self.messages[msg_idx].signals.get(sig_idx)
    }

    /// Exact-name signal lookup
    pub fn signal_id(&self, name: &str) -> Option<SignalId> {
        self.by_name.get(name).copied()
    }

    /// All signal IDs in catalog order
    pub fn signal_ids(&self) -> impl Iterator<Item = SignalId> {
        (0..self.locations.len()).map(SignalId)
    }

    /// Sanity report for the whole catalog; empty means clean
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let mut seen: HashMap<u32, &str> = HashMap::new();
        for message in &self.messages {
            if let Some(previous) = seen.insert(message.id, &message.name) {
                errors.push(format!(
                    "CAN ID 0x{:X} is used by both '{}' and '{}'",
                    message.id, previous, message.name
                ));
            }
            errors.extend(message.validate());
        }

        errors
    }
}

/// A CAN message defined in the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDefinition {
    /// CAN message ID (11-bit or 29-bit)
    pub id: u32,
    /// Message name
    pub name: String,
    /// Expected payload length in bytes
    pub size: u8,
    /// Signals contained in this message, in definition order
    pub signals: Vec<SignalDefinition>,
    #[serde(skip)]
    first_signal: usize,
}

impl MessageDefinition {
    pub fn new(id: u32, name: &str, size: u8) -> Self {
        Self {
            id,
            name: name.to_string(),
            size,
            signals: Vec::new(),
            first_signal: 0,
        }
    }

    pub fn with_signal(mut self, signal: SignalDefinition) -> Self {
        self.signals.push(signal);
        self
    }

    /// Catalog-wide ID of the signal at `index` within this message
    ///
    /// Only meaningful for messages owned by a [`Catalog`].
    pub fn signal_id(&self, index: usize) -> SignalId {
        SignalId(self.first_signal + index)
    }

    /// Signals paired with their catalog IDs
    pub fn signals_with_ids(&self) -> impl Iterator<Item = (SignalId, &SignalDefinition)> + '_ {
        self.signals
            .iter()
            .enumerate()
            .map(move |(i, s)| (SignalId(self.first_signal + i), s))
    }

    /// Check for signal overlap and signals that do not fit the declared size
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let max_bits = self.size as usize * 8;

        let footprints: Vec<Vec<usize>> = self.signals.iter().map(signal_bit_positions).collect();

        for (signal, bits) in self.signals.iter().zip(&footprints) {
            if bits.iter().any(|&b| b >= max_bits) {
                errors.push(format!(
                    "Signal '{}' extends beyond message '{}' ({} bytes)",
                    signal.name, self.name, self.size
                ));
            }
        }

        for i in 0..self.signals.len() {
            for j in (i + 1)..self.signals.len() {
                let (a, b) = (&self.signals[i], &self.signals[j]);
                if !a.multiplex.may_coexist_with(&b.multiplex) {
                    continue;
                }
                if footprints[i].iter().any(|bit| footprints[j].contains(bit)) {
                    errors.push(format!(
                        "Signals '{}' and '{}' overlap in message '{}'",
                        a.name, b.name, self.name
                    ));
                }
            }
        }

        errors
    }
}

/// A signal defined in the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalDefinition {
    /// Signal name, unique across the catalog
    pub name: String,
    /// Owning message ID (filled in by the catalog)
    #[serde(default)]
    pub message_id: u32,
    /// Starting bit position (DBC notation)
    pub start_bit: u16,
    /// Number of bits, 1..=64
    pub bit_length: u8,
    #[serde(default)]
    pub byte_order: ByteOrder,
    #[serde(default)]
    pub value_type: ValueType,
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default)]
    pub offset: f64,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub unit: Option<String>,
    #[serde(default)]
    pub multiplex: Multiplex,
    /// Index (within the message) of the multiplexor gating this signal
    #[serde(skip)]
    pub(crate) controller: Option<usize>,
}

fn default_factor() -> f64 {
    1.0
}

impl SignalDefinition {
    /// Create a new unsigned Intel (little-endian) signal
    pub fn new(name: &str, start_bit: u16, bit_length: u8) -> Self {
        Self {
            name: name.to_string(),
            message_id: 0,
            start_bit,
            bit_length,
            byte_order: ByteOrder::Intel,
            value_type: ValueType::Unsigned,
            factor: 1.0,
            offset: 0.0,
            minimum: None,
            maximum: None,
            unit: None,
            multiplex: Multiplex::Plain,
            controller: None,
        }
    }

    pub fn with_layout(mut self, byte_order: ByteOrder, value_type: ValueType) -> Self {
        self.byte_order = byte_order;
        self.value_type = value_type;
        self
    }

    pub fn with_scaling(mut self, factor: f64, offset: f64) -> Self {
        self.factor = factor;
        self.offset = offset;
        self
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.minimum = Some(min);
        self.maximum = Some(max);
        self
    }

    pub fn with_multiplex(mut self, multiplex: Multiplex) -> Self {
        self.multiplex = multiplex;
        self
    }

    /// Whether `value` lies inside the declared range (no range = always)
    pub fn in_range(&self, value: f64) -> bool {
        match (self.minimum, self.maximum) {
            // DBC writes [0|0] when no range is defined
            (Some(min), Some(max)) if min == 0.0 && max == 0.0 => true,
            (min, max) => {
                min.map_or(true, |m| value >= m) && max.map_or(true, |m| value <= m)
            }
        }
    }
}

/// Byte order for signal encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    /// Big endian (Motorola format)
    Motorola,
    /// Little endian (Intel format)
    #[default]
    Intel,
}

/// Value type for signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// Signed integer (two's complement)
    Signed,
    /// Unsigned integer
    #[default]
    Unsigned,
}

/// Multiplex role of a signal
///
/// Selectors compare against the multiplexor's raw (unscaled) value. When
/// `multiplexor` is `None` the message's single `Multiplexor` signal applies.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Multiplex {
    #[default]
    Plain,
    Multiplexor,
    Multiplexed {
        selector: u64,
        #[serde(default)]
        multiplexor: Option<String>,
    },
    Both {
        selector: u64,
        #[serde(default)]
        multiplexor: Option<String>,
    },
}

impl Multiplex {
    pub fn multiplexed(selector: u64) -> Self {
        Multiplex::Multiplexed {
            selector,
            multiplexor: None,
        }
    }

    /// Selector value this signal is gated on
    pub fn selector(&self) -> Option<u64> {
        match self {
            Multiplex::Multiplexed { selector, .. } | Multiplex::Both { selector, .. } => {
                Some(*selector)
            }
            _ => None,
        }
    }

    /// Whether other signals may be gated on this one
    pub fn is_multiplexor(&self) -> bool {
        matches!(self, Multiplex::Multiplexor | Multiplex::Both { .. })
    }

    fn multiplexor_name(&self) -> Option<&str> {
        match self {
            Multiplex::Multiplexed { multiplexor, .. } | Multiplex::Both { multiplexor, .. } => {
                multiplexor.as_deref()
            }
            _ => None,
        }
    }

    fn set_multiplexor(&mut self, name: String) {
        if let Multiplex::Multiplexed { multiplexor, .. } | Multiplex::Both { multiplexor, .. } =
            self
        {
            *multiplexor = Some(name);
        }
    }

    /// False when both signals are gated on the same multiplexor with
    /// different selectors, so they can never be live in the same frame
    fn may_coexist_with(&self, other: &Multiplex) -> bool {
        match (self.selector(), other.selector()) {
            (Some(a), Some(b)) => a == b || self.multiplexor_name() != other.multiplexor_name(),
            _ => true,
        }
    }
}

/// Resolve the controlling multiplexor of each gated signal, rejecting cycles
fn resolve_multiplexors(message: &mut MessageDefinition) -> Result<()> {
    let roots: Vec<usize> = message
        .signals
        .iter()
        .enumerate()
        .filter(|(_, s)| s.multiplex == Multiplex::Multiplexor)
        .map(|(i, _)| i)
        .collect();

    let mut controllers = Vec::with_capacity(message.signals.len());
    for signal in &message.signals {
        if signal.multiplex.selector().is_none() {
            controllers.push(None);
            continue;
        }

        let controller = match signal.multiplex.multiplexor_name() {
            Some(name) => message
                .signals
                .iter()
                .position(|s| s.name == name && s.multiplex.is_multiplexor())
                .ok_or_else(|| {
                    IcError::InvalidCatalog(format!(
                        "signal '{}' names multiplexor '{}', which is not a multiplexor in message '{}'",
                        signal.name, name, message.name
                    ))
                })?,
            None => match roots.as_slice() {
                [root] => *root,
                _ => {
                    return Err(IcError::InvalidCatalog(format!(
                        "signal '{}' is multiplexed but message '{}' has {} multiplexors",
                        signal.name,
                        message.name,
                        roots.len()
                    )))
                }
            },
        };
        controllers.push(Some(controller));
    }

    // Every chain of controllers must end at a plain multiplexor
    for start in 0..controllers.len() {
        let mut current = controllers[start];
        let mut steps = 0;
        while let Some(idx) = current {
            steps += 1;
            if steps > controllers.len() {
                return Err(IcError::InvalidCatalog(format!(
                    "multiplexor cycle through signal '{}' in message '{}'",
                    message.signals[start].name, message.name
                )));
            }
            current = controllers[idx];
        }
    }

    for (signal, controller) in message.signals.iter_mut().zip(controllers) {
        signal.controller = controller;
    }
    Ok(())
}

/// Parse a message line from DBC format
/// Format: BO_ <id> <name>: <dlc> <transmitter>
fn parse_message_line(line: &str) -> Option<MessageDefinition> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 4 || parts[0] != "BO_" {
        return None;
    }

    let id = parts[1].parse::<u32>().ok()? & !DBC_EXTENDED_ID_FLAG;
    let name = parts[2].trim_end_matches(':');
    let size = parts[3].parse::<u8>().ok()?;

    Some(MessageDefinition::new(id, name, size))
}

/// Parse a signal line from DBC format
/// Format: SG_ <name> [M|m<val>|m<val>M] : <start>|<len>@<order><sign> (<factor>,<offset>) [<min>|<max>] "<unit>" <receivers>
fn parse_signal_line(line: &str) -> Option<SignalDefinition> {
    let line = line.strip_prefix("SG_ ")?;

    let colon_pos = line.find(':')?;
    let mut name_part = line[..colon_pos].split_whitespace();
    let rest = line[colon_pos + 1..].trim_start();

    let name = name_part.next()?;
    let multiplex = match name_part.next() {
        Some(marker) => parse_multiplex_marker(marker)?,
        None => Multiplex::Plain,
    };

    let parts: Vec<&str> = rest.split_whitespace().collect();
    let bit_info = parts.first()?;

    let at_pos = bit_info.find('@')?;
    let (bit_part, order_type) = bit_info.split_at(at_pos);
    let (start, len) = bit_part.split_once('|')?;
    let start_bit = start.parse::<u16>().ok()?;
    let bit_length = len.parse::<u8>().ok()?;
    let (byte_order, value_type) = parse_order_and_type(order_type)?;

    let mut signal = SignalDefinition::new(name, start_bit, bit_length)
        .with_layout(byte_order, value_type)
        .with_multiplex(multiplex);

    if let Some(part) = parts.iter().find(|p| p.starts_with('(')) {
        let fo = part.trim_matches(|c| c == '(' || c == ')');
        let (factor, offset) = fo.split_once(',')?;
        signal.factor = factor.parse().ok()?;
        signal.offset = offset.parse().ok()?;
    }

    if let Some(part) = parts.iter().find(|p| p.starts_with('[')) {
        let (min, max) = parse_min_max(part);
        signal.minimum = min;
        signal.maximum = max;
    }

    signal.unit = parts
        .iter()
        .find(|p| p.starts_with('"'))
        .map(|p| p.trim_matches('"').to_string())
        .filter(|u| !u.is_empty());

    Some(signal)
}

/// `M` = multiplexor, `m3` = multiplexed on 3, `m3M` = both
fn parse_multiplex_marker(marker: &str) -> Option<Multiplex> {
    if marker == "M" {
        return Some(Multiplex::Multiplexor);
    }
    let body = marker.strip_prefix('m')?;
    let (digits, both) = match body.strip_suffix('M') {
        Some(digits) => (digits, true),
        None => (body, false),
    };
    let selector = digits.parse::<u64>().ok()?;
    Some(if both {
        Multiplex::Both {
            selector,
            multiplexor: None,
        }
    } else {
        Multiplex::multiplexed(selector)
    })
}

/// Parse byte order and value type from format like "@1+"
fn parse_order_and_type(s: &str) -> Option<(ByteOrder, ValueType)> {
    let mut chars = s.strip_prefix('@')?.chars();

    let byte_order = match chars.next()? {
        '0' => ByteOrder::Motorola,
        '1' => ByteOrder::Intel,
        _ => return None,
    };

    let value_type = match chars.next()? {
        '+' => ValueType::Unsigned,
        '-' => ValueType::Signed,
        _ => return None,
    };

    Some((byte_order, value_type))
}

/// Parse min and max from format like "[0|255]"
fn parse_min_max(s: &str) -> (Option<f64>, Option<f64>) {
    let s = s.trim_matches(|c| c == '[' || c == ']');
    match s.split_once('|') {
        Some((min, max)) => (min.parse().ok(), max.parse().ok()),
        None => (None, None),
    }
}

/// Format: SG_MUL_VAL_ <msg id> <signal> <multiplexor> <ranges>;
fn parse_mul_val_line(line: &str) -> Option<(u32, String, String)> {
    let mut parts = line.strip_prefix("SG_MUL_VAL_ ")?.split_whitespace();
    let id = parts.next()?.parse::<u32>().ok()? & !DBC_EXTENDED_ID_FLAG;
    let signal = parts.next()?.to_string();
    let multiplexor = parts.next()?.trim_end_matches(';').to_string();
    Some((id, signal, multiplexor))
}
