//! Block pass driven by the `pulldown-cmark` event stream.

use super::inline::InlineRun;
use super::{code_block, image_phrase, section_line, CleaningOptions};
use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};

pub(super) fn render_blocks(text: &str, options: &CleaningOptions) -> Vec<String> {
    let mut walker = BlockWalker::new(options);
    for event in Parser::new_ext(text, Options::ENABLE_TABLES) {
        walker.handle(event);
    }
    walker.finish()
}

struct BlockWalker<'a> {
    options: &'a CleaningOptions,
    blocks: Vec<String>,
    /// Raw inline text of the block being read; cleaned once the block ends.
    inline: InlineRun,
    /// Cells of the table row being read.
    row: Option<Vec<InlineRun>>,
    code: Option<String>,
    image_alt: Option<String>,
}

impl<'a> BlockWalker<'a> {
    fn new(options: &'a CleaningOptions) -> Self {
        Self {
            options,
            blocks: Vec::new(),
            inline: InlineRun::default(),
            row: None,
            code: None,
            image_alt: None,
        }
    }

    fn handle(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) => self.push_text(&text),
            Event::Code(code) => self.push_code(&code),
            // Tags were stripped before parsing; anything left came from decoded
            // entities and is meant literally.
            Event::Html(text) | Event::InlineHtml(text) => self.push_text(&text),
            Event::SoftBreak => self.push_text(" "),
            Event::HardBreak => self.push_text(". "),
            Event::Rule => self.flush_inline(),
            _ => {}
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Paragraph | Tag::Heading { .. } | Tag::Item | Tag::List(_) => self.flush_inline(),
            Tag::CodeBlock(_) => {
                self.flush_inline();
                self.code = Some(String::new());
            }
            Tag::Image { .. } => self.image_alt = Some(String::new()),
            Tag::TableHead | Tag::TableRow => {
                self.flush_inline();
                self.row = Some(Vec::new());
            }
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph | TagEnd::Item | TagEnd::List(_) | TagEnd::HtmlBlock => {
                self.flush_inline()
            }
            TagEnd::Heading(_) => {
                let heading = std::mem::take(&mut self.inline).clean(self.options);
                if let Some(line) = section_line(&heading) {
                    self.blocks.push(line);
                }
            }
            TagEnd::CodeBlock => {
                if let Some(code) = self.code.take() {
                    if let Some(spoken) = code_block(&code, self.options) {
                        self.blocks.push(spoken);
                    }
                }
            }
            TagEnd::Image => {
                if let Some(alt) = self.image_alt.take() {
                    let phrase = image_phrase(&alt);
                    self.inline.push_prose(&phrase);
                }
            }
            TagEnd::TableCell => {
                let cell = std::mem::take(&mut self.inline);
                if let Some(row) = self.row.as_mut() {
                    if !cell.is_blank() {
                        row.push(cell);
                    }
                }
            }
            TagEnd::TableHead | TagEnd::TableRow => {
                let mut joined = InlineRun::default();
                for cell in self.row.take().unwrap_or_default() {
                    joined.append(cell, ". ");
                }
                self.inline = joined;
                self.flush_inline();
            }
            _ => {}
        }
    }

    fn push_text(&mut self, text: &str) {
        if let Some(code) = self.code.as_mut() {
            code.push_str(text);
        } else if let Some(alt) = self.image_alt.as_mut() {
            alt.push_str(text);
        } else {
            self.inline.push_prose(text);
        }
    }

    fn push_code(&mut self, code: &str) {
        if let Some(alt) = self.image_alt.as_mut() {
            alt.push_str(code);
        } else {
            self.inline.push_code(code);
        }
    }

    fn flush_inline(&mut self) {
        let inline = std::mem::take(&mut self.inline);
        if inline.is_blank() {
            return;
        }
        let cleaned = inline.clean(self.options);
        if !cleaned.is_empty() {
            self.blocks.push(cleaned);
        }
    }

    fn finish(mut self) -> Vec<String> {
        if let Some(code) = self.code.take() {
            if let Some(spoken) = code_block(&code, self.options) {
                self.blocks.push(spoken);
            }
        }
        self.flush_inline();
        self.blocks
    }
}
