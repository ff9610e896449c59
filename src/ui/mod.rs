use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::canvas::{Canvas, Map, MapResolution, Points};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::Frame;
use regex::Regex;
use strum::IntoEnumIterator;
use time::macros::format_description;
use time::OffsetDateTime;
use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthStr;

use crate::app::state::{AppState, FocusPane, FormField, InputMode};
use crate::app::{StatsView, ViewState};
use crate::filter::{CategoryFilter, FilterCounts, StatusFilter};
use crate::highlight::{build_highlight_regex, split_matches};
use crate::model::{PinCategory, PinRecord, PinStatus};
use crate::staging::{FormDraft, SectionField, StagedImage};

/// List previews are cut to this many display columns.
pub const PREVIEW_COLUMNS: usize = 60;

pub fn draw_app(frame: &mut Frame, state: &AppState, list_state: &mut ListState) {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Min(3),
            Constraint::Length(3),
        ])
        .split(frame.size());

    let counts = state.counts();
    frame.render_widget(Paragraph::new(filter_tabs(state, &counts)), vertical[0]);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(vertical[1]);

    draw_list(frame, state, list_state, columns[0]);
    draw_map(frame, state, columns[1]);

    let status = Paragraph::new(build_status_line(state)).style(Style::default().fg(Color::Gray));
    frame.render_widget(status, vertical[2]);

    render_view(frame, state);
}

pub fn marker_color(status: PinStatus) -> Color {
    match status {
        PinStatus::Wishlisted => Color::Rgb(255, 165, 0),
        PinStatus::Visited => Color::Green,
        PinStatus::Favorite => Color::Red,
    }
}

/// Cuts `text` to `max` display columns, marking the cut with `...`.
pub fn truncate_columns(text: &str, max: usize) -> String {
    if text.width() <= max {
        return text.to_string();
    }
    let mut out = String::new();
    let mut used = 0;
    for grapheme in text.graphemes(true) {
        let width = grapheme.width();
        if used + width > max {
            break;
        }
        used += width;
        out.push_str(grapheme);
    }
    out.push_str("...");
    out
}

/// One-line summary of a pin's first non-empty section.
pub fn section_preview(pin: &PinRecord) -> Option<String> {
    pin.sections
        .iter()
        .map(|section| section.content.trim())
        .find(|content| !content.is_empty())
        .map(|content| {
            let single_line = content.split_whitespace().collect::<Vec<_>>().join(" ");
            truncate_columns(&single_line, PREVIEW_COLUMNS)
        })
}

pub fn status_tab_label(filter: StatusFilter, count: usize) -> String {
    match filter {
        StatusFilter::All => format!("All ({count})"),
        StatusFilter::Only(status) => format!("{} {count}", status.icon()),
    }
}

pub fn category_tab_label(filter: CategoryFilter, count: usize) -> String {
    match filter {
        CategoryFilter::All => format!("All ({count})"),
        CategoryFilter::Only(category) => format!("{} {count}", category.plural_label()),
    }
}

fn filter_tabs(state: &AppState, counts: &FilterCounts) -> Text<'static> {
    let active = Style::default()
        .fg(Color::Black)
        .bg(Color::Cyan)
        .add_modifier(Modifier::BOLD);
    let idle = Style::default().fg(Color::Gray);

    let mut status_spans = vec![Span::styled(
        format!("{} ", state.store().scope().label()),
        Style::default().add_modifier(Modifier::BOLD),
    )];
    for (filter, count) in counts.status_tabs() {
        let style = if filter == state.filter.status { active } else { idle };
        status_spans.push(Span::styled(format!(" {} ", status_tab_label(filter, count)), style));
        status_spans.push(Span::raw(" "));
    }

    let mut category_spans = vec![Span::styled("Category ", idle)];
    for (filter, count) in counts.category_tabs() {
        let style = if filter == state.filter.category { active } else { idle };
        category_spans.push(Span::styled(
            format!(" {} ", category_tab_label(filter, count)),
            style,
        ));
        category_spans.push(Span::raw(" "));
    }
    Text::from(vec![Line::from(status_spans), Line::from(category_spans)])
}

fn draw_list(frame: &mut Frame, state: &AppState, list_state: &mut ListState, area: Rect) {
    let highlight_regex = build_highlight_regex(&state.filter.search);
    let highlight_style = Style::default()
        .fg(Color::Yellow)
        .add_modifier(Modifier::BOLD);

    let visible = state.visible();
    let mut items = Vec::with_capacity(visible.len());
    for pin in &visible {
        let mut title_spans = vec![Span::styled(
            format!("{} ", pin.status.icon()),
            Style::default().fg(marker_color(pin.status)),
        )];
        title_spans.extend(highlight_line(
            &pin.title,
            highlight_regex.as_ref(),
            highlight_style,
            Style::default().add_modifier(Modifier::BOLD),
        ));
        title_spans.push(Span::styled(
            format!("  {}", pin.category.label()),
            Style::default().fg(Color::Gray),
        ));
        if !pin.is_public {
            title_spans.push(Span::styled(
                " [private]",
                Style::default()
                    .fg(Color::DarkGray)
                    .add_modifier(Modifier::ITALIC),
            ));
        }
        let mut lines = vec![Line::from(title_spans)];
        if let Some(preview) = section_preview(pin) {
            let mut spans = vec![Span::raw("   ")];
            spans.extend(highlight_line(
                &preview,
                highlight_regex.as_ref(),
                highlight_style,
                Style::default().fg(Color::Gray),
            ));
            lines.push(Line::from(spans));
        }
        items.push(ListItem::new(lines));
    }

    let title = if state.is_loading() {
        format!("{} (loading...)", state.store().scope().label())
    } else {
        format!(
            "{} ({}/{})",
            state.store().scope().label(),
            visible.len(),
            state.store().len()
        )
    };
    let border_style = if state.focus() == FocusPane::List {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default()
    };
    let list = if items.is_empty() {
        let empty = if state.store().is_loaded() {
            "No pins match. Press n to add one at the map cursor."
        } else {
            "Loading pins..."
        };
        List::new(vec![ListItem::new(Span::styled(
            empty,
            Style::default().fg(Color::Gray),
        ))])
    } else {
        List::new(items)
    };
    let list = list
        .block(
            Block::default()
                .title(title)
                .borders(Borders::ALL)
                .border_style(border_style),
        )
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::Black)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("▸ ");
    frame.render_stateful_widget(list, area, list_state);
}

fn draw_map(frame: &mut Frame, state: &AppState, area: Rect) {
    let visible = state.visible();
    let mut by_status: Vec<(PinStatus, Vec<(f64, f64)>)> =
        PinStatus::iter().map(|status| (status, Vec::new())).collect();
    for pin in &visible {
        if let Some((_, coords)) = by_status.iter_mut().find(|(status, _)| *status == pin.status) {
            coords.push((pin.coordinate.lon(), pin.coordinate.lat()));
        }
    }
    let selected = state
        .selected_pin()
        .map(|pin| (pin.coordinate.lon(), pin.coordinate.lat()));
    let cursor = state.cursor();
    let border_style = if state.focus() == FocusPane::Map {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default()
    };

    let canvas = Canvas::default()
        .block(
            Block::default()
                .title(format!("Map  cursor {cursor}"))
                .borders(Borders::ALL)
                .border_style(border_style),
        )
        .x_bounds([-180.0, 180.0])
        .y_bounds([-90.0, 90.0])
        .paint(move |ctx| {
            ctx.draw(&Map {
                color: Color::DarkGray,
                resolution: MapResolution::High,
            });
            ctx.layer();
            for (status, coords) in &by_status {
                ctx.draw(&Points {
                    coords,
                    color: marker_color(*status),
                });
            }
            if let Some((x, y)) = selected {
                ctx.print(x, y, Span::styled("◉", Style::default().fg(Color::Cyan)));
            }
            ctx.print(
                cursor.lon(),
                cursor.lat(),
                Span::styled(
                    "+",
                    Style::default()
                        .fg(Color::White)
                        .add_modifier(Modifier::BOLD),
                ),
            );
        });
    frame.render_widget(canvas, area);
}

fn build_status_line(state: &AppState) -> Text<'static> {
    let focus = match state.focus() {
        FocusPane::List => "List",
        FocusPane::Map => "Map",
    };
    let mut spans = vec![
        Span::raw(format!("Status: {} ", state.filter.status)),
        Span::raw(format!("| Category: {} ", state.filter.category)),
        Span::raw("| Focus: "),
        Span::styled(focus, Style::default().add_modifier(Modifier::BOLD)),
    ];
    if state.input_mode() == InputMode::Search || !state.filter.search.is_empty() {
        spans.push(Span::raw(" | Search: "));
        let mut query = state.filter.search.clone();
        if state.input_mode() == InputMode::Search {
            query.push('▌');
        }
        spans.push(Span::styled(
            query,
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ));
    }
    if state.view().is_busy() {
        spans.push(Span::styled(
            " | working...",
            Style::default().fg(Color::Cyan),
        ));
    }

    let message = state
        .status_message()
        .map(str::to_string)
        .unwrap_or_default();
    let hints = "j/k select • Enter open • Tab list/map • n new pin • / search • s status • c category • P mine/public • S stats • q quit";
    Text::from(vec![
        Line::from(spans),
        Line::from(Span::styled(message, Style::default().fg(Color::White))),
        Line::from(Span::styled(hints, Style::default().fg(Color::DarkGray))),
    ])
}

fn highlight_line(
    text: &str,
    regex: Option<&Regex>,
    highlight_style: Style,
    base_style: Style,
) -> Vec<Span<'static>> {
    split_matches(text, regex)
        .into_iter()
        .map(|(run, matched)| {
            let style = if matched { highlight_style } else { base_style };
            Span::styled(run.to_string(), style)
        })
        .collect()
}

fn format_date(dt: OffsetDateTime) -> String {
    dt.format(&format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| dt.unix_timestamp().to_string())
}

fn render_view(frame: &mut Frame, state: &AppState) {
    match state.view_state() {
        ViewState::Browsing => {}
        ViewState::ViewingDetail { confirm_delete, .. } => {
            let Some(pin) = state.open_pin() else {
                return;
            };
            let area = centered_rect(70, 70, frame.size());
            frame.render_widget(Clear, area);
            let owner = state.store().is_owner(pin);
            let paragraph = Paragraph::new(detail_lines(pin, owner, *confirm_delete))
                .block(
                    Block::default()
                        .title(format!("Pin {}", pin.id))
                        .borders(Borders::ALL)
                        .border_style(Style::default().fg(marker_color(pin.status))),
                )
                .wrap(Wrap { trim: false });
            frame.render_widget(paragraph, area);
        }
        ViewState::Creating { coordinate } => {
            let title = format!("New pin at {coordinate}");
            render_form(frame, state, title);
        }
        ViewState::Editing { pin, .. } => {
            let title = format!("Edit pin {pin}");
            render_form(frame, state, title);
        }
        ViewState::ViewingStats { stats } => {
            let area = centered_rect(50, 60, frame.size());
            frame.render_widget(Clear, area);
            let paragraph = Paragraph::new(stats_lines(stats)).block(
                Block::default()
                    .title("Travel Stats")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::Cyan)),
            );
            frame.render_widget(paragraph, area);
        }
    }
}

pub fn detail_lines(pin: &PinRecord, owner: Option<bool>, confirm_delete: bool) -> Vec<Line<'static>> {
    let gray = Style::default().fg(Color::Gray);
    let mut lines = vec![
        Line::from(Span::styled(
            pin.title.clone(),
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(vec![
            Span::styled(
                format!("{} {}", pin.status.icon(), pin.status.label()),
                Style::default().fg(marker_color(pin.status)),
            ),
            Span::raw(format!(" • {}", pin.category.label())),
            Span::styled(
                if pin.is_public { " • Public" } else { " • Private" },
                gray,
            ),
        ]),
        Line::from(Span::styled(
            format!("{} • added {}", pin.coordinate, format_date(pin.created_at)),
            gray,
        )),
    ];
    if let Some(name) = &pin.owner_name {
        lines.push(Line::from(Span::styled(format!("by {name}"), gray)));
    }
    if let Some(image) = &pin.image {
        lines.push(Line::from(Span::styled(format!("Image: {}", image.as_str()), gray)));
    }
    for section in &pin.sections {
        lines.push(Line::from(""));
        if !section.title.is_empty() {
            lines.push(Line::from(Span::styled(
                section.title.clone(),
                Style::default().add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
            )));
        }
        for line in section.content.lines() {
            lines.push(Line::from(line.to_string()));
        }
    }
    lines.push(Line::from(""));
    if confirm_delete {
        lines.push(Line::from(Span::styled(
            "Delete this pin permanently? y confirm • n keep",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )));
    } else {
        let hints = match owner {
            Some(true) => "e edit • d delete • Esc close",
            Some(false) => "c Add to My Pins • Esc close",
            None => "e edit • d delete • c Add to My Pins • Esc close",
        };
        lines.push(Line::from(Span::styled(hints, gray)));
    }
    lines
}

fn render_form(frame: &mut Frame, state: &AppState, title: String) {
    let area = centered_rect(70, 80, frame.size());
    frame.render_widget(Clear, area);
    let mut lines = form_lines(state.view().draft(), state.form_field(), state.image_path());
    if let ViewState::Editing {
        confirm_delete: true,
        ..
    } = state.view_state()
    {
        lines.push(Line::from(Span::styled(
            "Delete this pin permanently? y confirm • n keep editing",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )));
    }
    if state.view().is_busy() {
        lines.push(Line::from(Span::styled(
            "Saving...",
            Style::default().fg(Color::Cyan),
        )));
    }
    let paragraph = Paragraph::new(lines)
        .block(
            Block::default()
                .title(title)
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .wrap(Wrap { trim: false });
    frame.render_widget(paragraph, area);
}

pub fn form_lines(draft: &FormDraft, focus: FormField, image_path: &str) -> Vec<Line<'static>> {
    let label = |field: FormField, text: &str| {
        let style = if field == focus {
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::Gray)
        };
        Span::styled(format!("{text:<10}"), style)
    };
    let value = |field: FormField, text: &str| {
        let mut shown = text.to_string();
        if field == focus {
            shown.push('▌');
        }
        Span::raw(shown)
    };

    let mut lines = vec![Line::from(vec![
        label(FormField::Title, "Title"),
        value(FormField::Title, draft.title()),
    ])];

    for (index, section) in draft.sections().iter().enumerate() {
        let heading = FormField::Section(index, SectionField::Title);
        let body = FormField::Section(index, SectionField::Content);
        lines.push(Line::from(""));
        lines.push(Line::from(vec![
            label(heading, &format!("Section {}", index + 1)),
            value(heading, &section.title),
        ]));
        lines.push(Line::from(vec![
            label(body, "  text"),
            value(body, &section.content),
        ]));
    }
    lines.push(Line::from(""));

    let mut status_spans = vec![label(FormField::Status, "Status")];
    for status in PinStatus::iter() {
        let mark = if status == draft.status() { "(•)" } else { "( )" };
        status_spans.push(Span::styled(
            format!("{mark} {} {}  ", status.icon(), status.label()),
            Style::default().fg(marker_color(status)),
        ));
    }
    lines.push(Line::from(status_spans));

    lines.push(Line::from(vec![
        label(FormField::Category, "Category"),
        Span::raw(format!("< {} >", draft.category().label())),
    ]));
    lines.push(Line::from(vec![
        label(FormField::Public, "Public"),
        Span::raw(if draft.is_public() { "[x]" } else { "[ ]" }),
    ]));

    let image = match draft.image() {
        StagedImage::Empty => "none".to_string(),
        StagedImage::Pending { upload, .. } => format!("{} (preparing preview...)", upload.file_name),
        StagedImage::Staged { upload, preview } => {
            format!("{} ({})", upload.file_name, preview.summary())
        }
        StagedImage::Inherited(image) => format!("current: {}", image.as_str()),
    };
    lines.push(Line::from(vec![label(FormField::Image, "Image"), Span::raw(image)]));
    if focus == FormField::Image {
        lines.push(Line::from(vec![
            Span::raw(format!("{:<10}", "")),
            value(FormField::Image, image_path),
        ]));
    }

    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "Tab/↓ next • ←/→ change • Ctrl-a add section • Ctrl-d remove section • Enter load image path • Ctrl-s save • Esc cancel",
        Style::default().fg(Color::DarkGray),
    )));
    lines
}

pub fn stats_lines(stats: &StatsView) -> Vec<Line<'static>> {
    let stats = match stats {
        StatsView::Loading => return vec![Line::from("Loading stats...")],
        StatsView::Failed(message) => {
            return vec![
                Line::from(Span::styled(
                    format!("Could not load stats: {message}"),
                    Style::default().fg(Color::Red),
                )),
                Line::from(Span::styled("Esc close", Style::default().fg(Color::Gray))),
            ]
        }
        StatsView::Ready(stats) => stats,
    };
    let mut lines = vec![
        Line::from(Span::styled(
            format!("Total pins: {}", stats.total_pins),
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
    ];
    for status in PinStatus::iter() {
        lines.push(Line::from(Span::styled(
            format!("{} {:<12}{}", status.icon(), status.label(), stats.for_status(status)),
            Style::default().fg(marker_color(status)),
        )));
    }
    lines.push(Line::from(""));
    for category in PinCategory::iter() {
        lines.push(Line::from(format!(
            "{:<14}{}",
            category.plural_label(),
            stats.for_category(category)
        )));
    }
    lines
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Percentage((100 - percent_y) / 2),
                Constraint::Percentage(percent_y),
                Constraint::Percentage((100 - percent_y) / 2),
            ]
            .as_ref(),
        )
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints(
            [
                Constraint::Percentage((100 - percent_x) / 2),
                Constraint::Percentage(percent_x),
                Constraint::Percentage((100 - percent_x) / 2),
            ]
            .as_ref(),
        )
        .split(vertical[1])[1]
}
