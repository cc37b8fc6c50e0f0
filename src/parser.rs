//! Incremental textual block parser
//!
//! Models that have no native channel for reasoning or tool calls write them
//! inline, wrapped in tags such as `<thinking>…</thinking>` or
//! `<tool_call>…</tool_call>`. [`BlockParser`] consumes text in arbitrary
//! pieces and splits it into plain text and tagged blocks, in order.
//!
//! Outside a tag, text is released as soon as it cannot be the start of an
//! open tag; at most `longest open tag - 1` bytes are held back. Inside a tag
//! everything is buffered until the matching close tag arrives.

/// What a tag pair encloses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Thinking,
    ToolCall,
    Image,
    Audio,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TagPair {
    open: String,
    close: String,
    kind: TagKind,
}

/// The tags a parser recognizes
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TagSet {
    pairs: Vec<TagPair>,
}

impl TagSet {
    /// An empty set; every byte is plain text
    pub fn empty() -> Self {
        Self::default()
    }

    /// Reasoning, tool calls and media
    pub fn standard() -> Self {
        Self::empty()
            .with("<thinking>", "</thinking>", TagKind::Thinking)
            .with("<think>", "</think>", TagKind::Thinking)
            .with("<tool_call>", "</tool_call>", TagKind::ToolCall)
            .with("<image>", "</image>", TagKind::Image)
            .with("<audio>", "</audio>", TagKind::Audio)
    }

    /// Only the reasoning tags; used on vendor text streams
    pub fn thinking_only() -> Self {
        Self::empty()
            .with("<thinking>", "</thinking>", TagKind::Thinking)
            .with("<think>", "</think>", TagKind::Thinking)
    }

    pub fn with(mut self, open: impl Into<String>, close: impl Into<String>, kind: TagKind) -> Self {
        let open = open.into();
        if !open.is_empty() {
            self.pairs.push(TagPair {
                open,
                close: close.into(),
                kind,
            });
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    fn max_open_len(&self) -> usize {
        self.pairs.iter().map(|p| p.open.len()).max().unwrap_or(0)
    }

    /// Earliest open tag in `text`; the longest one wins a tie
    fn earliest_open(&self, text: &str) -> Option<(usize, usize)> {
        let mut best: Option<(usize, usize)> = None;
        for (index, pair) in self.pairs.iter().enumerate() {
            if let Some(pos) = text.find(&pair.open) {
                best = match best {
                    Some((best_pos, best_index))
                        if best_pos < pos
                            || (best_pos == pos
                                && self.pairs[best_index].open.len() >= pair.open.len()) =>
                    {
                        Some((best_pos, best_index))
                    }
                    _ => Some((pos, index)),
                };
            }
        }
        best
    }

    /// Length of the longest suffix of `text` that could still grow into an
    /// open tag
    fn partial_open_suffix(&self, text: &str) -> usize {
        let limit = self.max_open_len().saturating_sub(1).min(text.len());
        for keep in (1..=limit).rev() {
            let start = text.len() - keep;
            if !text.is_char_boundary(start) {
                continue;
            }
            let suffix = &text[start..];
            if self.pairs.iter().any(|p| p.open.starts_with(suffix)) {
                return keep;
            }
        }
        0
    }
}

/// One unit of parser output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedBlock {
    Text(String),
    Thinking(String),
    ToolCall(String),
    Image(String),
    Audio(String),
}

impl ParsedBlock {
    fn tagged(kind: TagKind, body: String) -> Self {
        match kind {
            TagKind::Thinking => ParsedBlock::Thinking(body),
            TagKind::ToolCall => ParsedBlock::ToolCall(body),
            TagKind::Image => ParsedBlock::Image(body),
            TagKind::Audio => ParsedBlock::Audio(body),
        }
    }
}

/// Streaming lexer over a [`TagSet`]
#[derive(Debug, Clone)]
pub struct BlockParser {
    tags: TagSet,
    buffer: String,
    active: Option<usize>,
}

impl BlockParser {
    pub fn new(tags: TagSet) -> Self {
        Self {
            tags,
            buffer: String::new(),
            active: None,
        }
    }

    /// Whether the parser is currently inside a tag
    pub fn in_tag(&self) -> bool {
        self.active.is_some()
    }

    /// Feed the next piece of text and collect every block it completes
    pub fn feed(&mut self, piece: &str) -> Vec<ParsedBlock> {
        self.buffer.push_str(piece);
        let mut out = Vec::new();

        loop {
            match self.active {
                None => {
                    if let Some((pos, index)) = self.tags.earliest_open(&self.buffer) {
                        if pos > 0 {
                            out.push(ParsedBlock::Text(self.buffer[..pos].to_string()));
                        }
                        let consumed = pos + self.tags.pairs[index].open.len();
                        self.buffer.drain(..consumed);
                        self.active = Some(index);
                        continue;
                    }

                    let keep = self.tags.partial_open_suffix(&self.buffer);
                    let release = self.buffer.len() - keep;
                    if release > 0 {
                        out.push(ParsedBlock::Text(self.buffer[..release].to_string()));
                        self.buffer.drain(..release);
                    }
                    break;
                }
                Some(index) => {
                    let pair = &self.tags.pairs[index];
                    let Some(pos) = self.buffer.find(&pair.close) else {
                        break;
                    };
                    let body = self.buffer[..pos].to_string();
                    let kind = pair.kind;
                    let consumed = pos + pair.close.len();
                    self.buffer.drain(..consumed);
                    self.active = None;
                    if !body.is_empty() {
                        out.push(ParsedBlock::tagged(kind, body));
                    }
                }
            }
        }

        out
    }

    /// Flush whatever is buffered. An unterminated tag yields its body as
    /// that tag's block; models often stop before writing the close tag.
    pub fn finish(&mut self) -> Vec<ParsedBlock> {
        let rest = std::mem::take(&mut self.buffer);
        let active = self.active.take();
        if rest.is_empty() {
            return Vec::new();
        }
        match active {
            Some(index) => vec![ParsedBlock::tagged(self.tags.pairs[index].kind, rest)],
            None => vec![ParsedBlock::Text(rest)],
        }
    }
}

/// Parse a complete text in one go
pub fn parse_all(tags: TagSet, text: &str) -> Vec<ParsedBlock> {
    let mut parser = BlockParser::new(tags);
    let mut blocks = parser.feed(text);
    blocks.extend(parser.finish());
    blocks
}
