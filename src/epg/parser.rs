//! Schedule Parser
//! Streaming scanner for XMLTV guide markup. Channel and programme blocks are
//! collected independently, joined by channel id, then sorted by start time.
//! A block that cannot be read is skipped and scanning resumes at the next one.

use std::borrow::Cow;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::{debug, info};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use super::types::{Channel, Program};
use crate::error::{EngineError, Result};
use crate::timestamp::{parse_broadcast_time, TimezonePolicy};

/// Title used when a programme block has none
pub const UNKNOWN_TITLE: &str = "Unknown";

/// Stored tokenizer errors are capped; the count is not
const MAX_STORED_ERRORS: usize = 50;

/// What was dropped while parsing a guide
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseReport {
    /// Programme blocks lacking a usable start/stop pair or channel reference
    pub skipped_programs: usize,
    /// Programme blocks naming a channel that was never declared
    pub orphaned_programs: usize,
    /// Tokenizer errors encountered (up to 50)
    pub errors: Vec<String>,
    /// Total count of tokenizer errors
    pub error_count: usize,
}

/// Parsed guide: channels in declaration order plus a report of what was skipped
#[derive(Debug, Clone, Default)]
pub struct ParsedGuide {
    pub channels: Vec<Channel>,
    pub report: ParseReport,
}

impl ParsedGuide {
    /// Total number of programs
    pub fn program_count(&self) -> usize {
        self.channels.iter().map(|c| c.programs.len()).sum()
    }
}

/// Parser state
#[derive(Debug, Clone, Copy, PartialEq)]
enum ParserState {
    Root,
    Channel,
    Programme,
    Title,
    Desc,
    Category,
    DisplayName,
}

/// Programme block under construction
#[derive(Debug, Default)]
struct ProgrammeDraft {
    channel_id: String,
    start: Option<DateTime<Utc>>,
    stop: Option<DateTime<Utc>>,
    title: Option<String>,
    description: Option<String>,
    category: Option<String>,
    icon: Option<String>,
}

impl ProgrammeDraft {
    fn finish(self) -> Option<Program> {
        if self.channel_id.is_empty() {
            return None;
        }
        let program = Program::new(
            self.channel_id,
            self.title.unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
            self.start?,
            self.stop?,
        )?;
        Some(
            program
                .with_description(self.description.unwrap_or_default())
                .with_category(self.category)
                .with_icon(self.icon),
        )
    }
}

/// Channel block under construction
#[derive(Debug)]
struct ChannelDraft {
    id: String,
    name: Option<String>,
}

/// Schedule parser for XMLTV guides
#[derive(Debug, Clone, Copy, Default)]
pub struct ScheduleParser {
    policy: TimezonePolicy,
}

impl ScheduleParser {
    pub fn new(policy: TimezonePolicy) -> Self {
        Self { policy }
    }

    /// Parse guide text.
    ///
    /// Fails with `MalformedSource` only when the text has no channel and no
    /// programme markers at all; everything else degrades to skipped blocks.
    pub fn parse(&self, xml: &str) -> Result<ParsedGuide> {
        let sanitized = sanitize_markup(xml);
        let xml: &str = &sanitized;
        // Byte offset of the current reader's slice within `xml`
        let mut base = 0usize;
        let mut xml_reader = block_reader(xml);

        let mut report = ParseReport::default();
        let mut channels: Vec<Channel> = Vec::new();
        let mut channel_index: HashMap<String, usize> = HashMap::new();
        let mut programs: Vec<Program> = Vec::new();

        let mut state = ParserState::Root;
        let mut current_channel: Option<ChannelDraft> = None;
        let mut current_program: Option<ProgrammeDraft> = None;
        let mut text_buf = String::new();
        let mut saw_markers = false;

        loop {
            let position = base + xml_reader.buffer_position() as usize;
            match xml_reader.read_event() {
                Ok(Event::Start(ref e)) => match e.name().as_ref() {
                    b"channel" => {
                        saw_markers = true;
                        state = ParserState::Channel;
                        current_channel = Some(self.open_channel(e));
                    }
                    b"programme" => {
                        saw_markers = true;
                        state = ParserState::Programme;
                        current_program = Some(self.open_programme(e));
                    }
                    b"title" if state == ParserState::Programme => {
                        state = ParserState::Title;
                        text_buf.clear();
                    }
                    b"desc" if state == ParserState::Programme => {
                        state = ParserState::Desc;
                        text_buf.clear();
                    }
                    b"category" if state == ParserState::Programme => {
                        state = ParserState::Category;
                        text_buf.clear();
                    }
                    b"display-name" if state == ParserState::Channel => {
                        state = ParserState::DisplayName;
                        text_buf.clear();
                    }
                    b"icon" if state == ParserState::Programme => {
                        if let Some(ref mut prog) = current_program {
                            prog.icon = get_attribute(e, b"src");
                        }
                    }
                    _ => {}
                },
                Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                    b"channel" => {
                        saw_markers = true;
                        let draft = self.open_channel(e);
                        commit_channel(draft, &mut channels, &mut channel_index);
                        state = ParserState::Root;
                    }
                    b"programme" => {
                        saw_markers = true;
                        let draft = self.open_programme(e);
                        commit_programme(draft, &mut programs, &mut report);
                        state = ParserState::Root;
                    }
                    b"icon" if state == ParserState::Programme => {
                        if let Some(ref mut prog) = current_program {
                            prog.icon = get_attribute(e, b"src");
                        }
                    }
                    _ => {}
                },
                Ok(Event::Text(e)) => {
                    if is_text_state(state) {
                        text_buf.push_str(&decode_xml_entities(&String::from_utf8_lossy(&e)));
                    }
                }
                Ok(Event::CData(e)) => {
                    if is_text_state(state) {
                        text_buf.push_str(&String::from_utf8_lossy(&e));
                    }
                }
                Ok(Event::GeneralRef(e)) => {
                    if is_text_state(state) {
                        let entity = format!("&{};", String::from_utf8_lossy(&e));
                        text_buf.push_str(&decode_xml_entities(&entity));
                    }
                }
                Ok(Event::End(ref e)) => match e.name().as_ref() {
                    b"channel" => {
                        if let Some(draft) = current_channel.take() {
                            commit_channel(draft, &mut channels, &mut channel_index);
                        }
                        state = ParserState::Root;
                    }
                    b"programme" => {
                        if let Some(draft) = current_program.take() {
                            commit_programme(draft, &mut programs, &mut report);
                        }
                        state = ParserState::Root;
                    }
                    b"title" if state == ParserState::Title => {
                        if let Some(ref mut prog) = current_program {
                            let title = text_buf.trim();
                            if prog.title.is_none() && !title.is_empty() {
                                prog.title = Some(title.to_string());
                            }
                        }
                        state = ParserState::Programme;
                    }
                    b"desc" if state == ParserState::Desc => {
                        if let Some(ref mut prog) = current_program {
                            let desc = text_buf.trim();
                            if prog.description.is_none() && !desc.is_empty() {
                                prog.description = Some(desc.to_string());
                            }
                        }
                        state = ParserState::Programme;
                    }
                    b"category" if state == ParserState::Category => {
                        if let Some(ref mut prog) = current_program {
                            let cat = text_buf.trim();
                            if prog.category.is_none() && !cat.is_empty() {
                                prog.category = Some(cat.to_string());
                            }
                        }
                        state = ParserState::Programme;
                    }
                    b"display-name" if state == ParserState::DisplayName => {
                        if let Some(ref mut chan) = current_channel {
                            let name = text_buf.trim();
                            if chan.name.is_none() && !name.is_empty() {
                                chan.name = Some(name.to_string());
                            }
                        }
                        state = ParserState::Channel;
                    }
                    _ => {}
                },
                Ok(Event::Eof) => break,
                Err(e) => {
                    report.error_count += 1;
                    if report.errors.len() < MAX_STORED_ERRORS {
                        report.errors.push(format!("XML error at byte {}: {}", position, e));
                    }

                    // Drop the block the error landed in, including a programme
                    // whose own start tag could not be read
                    let dropped_programme =
                        current_program.take().is_some() || tag_at(xml, position, "programme");
                    if dropped_programme {
                        report.skipped_programs += 1;
                    }
                    current_channel = None;
                    state = ParserState::Root;
                    text_buf.clear();

                    // The tokenizer cannot be trusted past an error; restart it at the next block
                    match find_next_block(xml, position + 1) {
                        Some(next) => {
                            debug!("Malformed guide markup at byte {}: {}; resuming at byte {}", position, e, next);
                            base = next;
                            xml_reader = block_reader(&xml[next..]);
                        }
                        None => {
                            debug!("Malformed guide markup at byte {}: {}; no further blocks", position, e);
                            break;
                        }
                    }
                }
                _ => {}
            }
        }

        if !saw_markers {
            return Err(EngineError::MalformedSource(
                "no channel or programme blocks found".to_string(),
            ));
        }

        for program in programs {
            match channel_index.get(&program.channel_id) {
                Some(&idx) => channels[idx].programs.push(program),
                None => report.orphaned_programs += 1,
            }
        }

        for channel in &mut channels {
            channel.sort_programs();
        }

        let guide = ParsedGuide { channels, report };
        info!(
            "Parsed guide: {} channels, {} programs ({} skipped, {} orphaned, {} XML errors)",
            guide.channels.len(),
            guide.program_count(),
            guide.report.skipped_programs,
            guide.report.orphaned_programs,
            guide.report.error_count
        );
        Ok(guide)
    }

    fn open_channel(&self, e: &BytesStart) -> ChannelDraft {
        ChannelDraft {
            id: get_attribute(e, b"id").unwrap_or_default(),
            name: None,
        }
    }

    fn open_programme(&self, e: &BytesStart) -> ProgrammeDraft {
        ProgrammeDraft {
            channel_id: get_attribute(e, b"channel").unwrap_or_default(),
            start: self.attribute_time(e, b"start"),
            stop: self.attribute_time(e, b"stop"),
            ..ProgrammeDraft::default()
        }
    }

    fn attribute_time(&self, e: &BytesStart, name: &[u8]) -> Option<DateTime<Utc>> {
        let raw = get_attribute(e, name)?;
        match parse_broadcast_time(&raw, self.policy) {
            Ok(t) => Some(t),
            Err(err) => {
                debug!("Dropping programme time {:?}: {}", raw, err);
                None
            }
        }
    }
}

fn block_reader(xml: &str) -> Reader<&[u8]> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().check_end_names = false;
    reader
}

/// True if an opening `<name` tag starts at byte `at`
fn tag_at(xml: &str, at: usize, name: &str) -> bool {
    let Some(rest) = xml.as_bytes().get(at..) else {
        return false;
    };
    let name = name.as_bytes();
    rest.first() == Some(&b'<')
        && rest[1..].starts_with(name)
        && matches!(rest.get(1 + name.len()), Some(b' ' | b'\t' | b'\r' | b'\n' | b'>' | b'/'))
}

/// Offset of the next `<programme` or `<channel` tag at or after `from`
fn find_next_block(xml: &str, from: usize) -> Option<usize> {
    let bytes = xml.as_bytes();
    (from..bytes.len())
        .filter(|&i| bytes[i] == b'<')
        .find(|&i| tag_at(xml, i, "programme") || tag_at(xml, i, "channel"))
}

fn is_text_state(state: ParserState) -> bool {
    matches!(
        state,
        ParserState::Title | ParserState::Desc | ParserState::Category | ParserState::DisplayName
    )
}

fn commit_channel(draft: ChannelDraft, channels: &mut Vec<Channel>, index: &mut HashMap<String, usize>) {
    if draft.id.is_empty() {
        debug!("Skipping channel block without id");
        return;
    }
    if index.contains_key(&draft.id) {
        debug!("Ignoring duplicate channel declaration {:?}", draft.id);
        return;
    }
    index.insert(draft.id.clone(), channels.len());
    channels.push(Channel::new(draft.id, draft.name));
}

fn commit_programme(draft: ProgrammeDraft, programs: &mut Vec<Program>, report: &mut ParseReport) {
    let channel_id = draft.channel_id.clone();
    match draft.finish() {
        Some(program) => programs.push(program),
        None => {
            report.skipped_programs += 1;
            debug!("Skipping programme block for channel {:?}", channel_id);
        }
    }
}

/// Replace characters, bare ampersands and stray `<` that would stop the tokenizer.
/// Legal XML 1.0 single-byte chars are tab, LF, CR and everything >= 0x20.
fn sanitize_markup(xml: &str) -> Cow<'_, str> {
    let needs_work = xml.char_indices().any(|(i, c)| {
        is_illegal_char(c)
            || (c == '&' && !is_valid_entity_start(&xml[i..]))
            || (c == '<' && !is_tag_start(&xml[i + 1..]))
    });
    if !needs_work {
        return Cow::Borrowed(xml);
    }

    let mut out = String::with_capacity(xml.len() + 64);
    for (i, c) in xml.char_indices() {
        if is_illegal_char(c) {
            out.push(' ');
        } else if c == '&' && !is_valid_entity_start(&xml[i..]) {
            out.push_str("&amp;");
        } else if c == '<' && !is_tag_start(&xml[i + 1..]) {
            out.push_str("&lt;");
        } else {
            out.push(c);
        }
    }
    Cow::Owned(out)
}

/// Text following `<` that can open markup: a name, `/`, `!` or `?`
fn is_tag_start(s: &str) -> bool {
    s.chars()
        .next()
        .is_some_and(|c| c.is_alphabetic() || matches!(c, '_' | ':' | '/' | '!' | '?'))
}

fn is_illegal_char(c: char) -> bool {
    matches!(c, '\u{0}'..='\u{8}' | '\u{b}' | '\u{c}' | '\u{e}'..='\u{1f}' | '\u{7f}')
}

/// Check if text starting with & looks like an XML entity: `&#...;` or `&name;`
fn is_valid_entity_start(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() < 3 {
        return false;
    }
    if bytes[1] == b'#' {
        return true;
    }
    for (end, &b) in bytes.iter().enumerate().skip(1).take(9) {
        match b {
            b';' => return end > 1,
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' => {}
            _ => return false,
        }
    }
    false
}

/// Decode XML entities back to normal characters
fn decode_xml_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }

    let mut result = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        result.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').and_then(|semi| {
            let name = &tail[1..semi];
            let c = match name {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some(' '),
                _ => name.strip_prefix('#').and_then(|num| {
                    let code = match num.strip_prefix(['x', 'X']) {
                        Some(hex) => u32::from_str_radix(hex, 16).ok(),
                        None => num.parse::<u32>().ok(),
                    };
                    code.and_then(char::from_u32)
                }),
            };
            c.map(|c| (c, semi + 1))
        });

        match decoded {
            Some((c, consumed)) => {
                result.push(c);
                rest = &tail[consumed..];
            }
            None => {
                result.push('&');
                rest = &tail[1..];
            }
        }
    }
    result.push_str(rest);
    result
}

/// Get attribute value from XML element
fn get_attribute(e: &BytesStart, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == name)
        .map(|attr| decode_xml_entities(&String::from_utf8_lossy(attr.value.as_ref())))
}

#[cfg(test)]
#[path = "parser_tests.rs"]
mod tests;
