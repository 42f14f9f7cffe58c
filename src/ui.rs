use rank_split::config::Settings;
use rank_split::db::{self, Party, PartyDetail};
use rank_split::numeric::Rank;
use rank_split::rates::{RankRates, RateAllocator};
use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use rusqlite::Connection;
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Parties,
    Rates,
    Settlement,
}

impl Page {
    pub fn next(&self) -> Self {
        match self {
            Page::Parties => Page::Rates,
            Page::Rates => Page::Settlement,
            Page::Settlement => Page::Parties,
        }
    }

    pub fn previous(&self) -> Self {
        match self {
            Page::Parties => Page::Settlement,
            Page::Rates => Page::Parties,
            Page::Settlement => Page::Rates,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Page::Parties => "Parties",
            Page::Rates => "Rank Rates",
            Page::Settlement => "Settlement",
        }
    }
}

pub struct App {
    conn: Connection,
    pub settings: Settings,
    pub parties: Vec<Party>,
    pub party_state: TableState,
    pub current_page: Page,

    /// Party opened from the list (committed data)
    pub detail: Option<PartyDetail>,

    /// Rates being edited; only written on commit
    pub draft: RankRates,
    pub remaining: f64,
    pub allocator: RateAllocator,
    pub rank_state: TableState,

    pub status: Option<String>,
}

impl App {
    pub fn new(conn: Connection, settings: Settings) -> Result<Self> {
        let mut app = Self {
            conn,
            settings,
            parties: Vec::new(),
            party_state: TableState::default(),
            current_page: Page::Parties,
            detail: None,
            draft: RankRates::new(),
            remaining: 0.0,
            allocator: RateAllocator::new(Vec::new()),
            rank_state: TableState::default(),
            status: None,
        };
        app.reload_parties()?;
        Ok(app)
    }

    pub fn reload_parties(&mut self) -> Result<()> {
        self.parties = db::list_parties(&self.conn)?;
        if self.parties.is_empty() {
            self.party_state.select(None);
        } else {
            let selected = self.party_state.selected().unwrap_or(0).min(self.parties.len() - 1);
            self.party_state.select(Some(selected));
        }
        Ok(())
    }

    pub fn selected_party(&self) -> Option<&Party> {
        self.party_state.selected().and_then(|i| self.parties.get(i))
    }

    /// Load the selected party and start a rate draft from its stored rates
    pub fn open_selected_party(&mut self) -> Result<()> {
        let party_id = match self.selected_party() {
            Some(party) => party.id,
            None => return Ok(()),
        };

        let detail = match db::load_party_detail(&self.conn, party_id, self.settings.rate_policy)? {
            Some(detail) => detail,
            None => {
                self.status = Some(format!("Party {} no longer exists", party_id));
                return self.reload_parties();
            }
        };

        self.allocator = RateAllocator::new(detail.ranks());
        self.draft = detail.rank_rates.clone();
        self.remaining = 100.0 - self.draft.total();
        self.rank_state
            .select(if self.allocator.ranks().is_empty() { None } else { Some(0) });
        self.status = detail.settlement_error.clone();
        self.detail = Some(detail);
        self.current_page = Page::Rates;
        Ok(())
    }

    pub fn selected_rank(&self) -> Option<Rank> {
        self.rank_state
            .selected()
            .and_then(|i| self.allocator.ranks().get(i).copied())
    }

    /// Move the selected rank's slider by `steps` times the configured step
    pub fn nudge_selected_rate(&mut self, steps: f64) {
        let rank = match self.selected_rank() {
            Some(rank) => rank,
            None => return,
        };

        let value = (self.draft.get(rank) + steps * self.settings.rate_step).clamp(0.0, 100.0);
        match self.allocator.apply(&self.draft, rank, value) {
            Ok(edit) => {
                self.draft = edit.rates;
                self.remaining = edit.remaining;
                self.status = None;
            }
            Err(err) => self.status = Some(err.to_string()),
        }
    }

    pub fn reset_draft(&mut self) {
        self.draft = self.allocator.even_split();
        self.remaining = 100.0 - self.draft.total();
        self.status = Some("Rates split evenly (not saved)".to_string());
    }

    /// Persist the draft and reload the party so the settlement reflects it
    pub fn commit_draft(&mut self) -> Result<()> {
        let party_id = match &self.detail {
            Some(detail) => detail.party.id,
            None => return Ok(()),
        };

        match db::replace_rank_rates(&self.conn, party_id, &self.draft) {
            Ok(_) => {
                self.detail = db::load_party_detail(&self.conn, party_id, self.settings.rate_policy)?;
                self.status = Some("Rank rates saved".to_string());
            }
            Err(err) => self.status = Some(format!("Not saved: {}", err)),
        }
        Ok(())
    }

    pub fn next(&mut self) {
        match self.current_page {
            Page::Parties => step_selection(&mut self.party_state, self.parties.len(), 1),
            Page::Rates => step_selection(&mut self.rank_state, self.allocator.ranks().len(), 1),
            Page::Settlement => {}
        }
    }

    pub fn previous(&mut self) {
        match self.current_page {
            Page::Parties => step_selection(&mut self.party_state, self.parties.len(), -1),
            Page::Rates => step_selection(&mut self.rank_state, self.allocator.ranks().len(), -1),
            Page::Settlement => {}
        }
    }

    pub fn next_page(&mut self) {
        self.current_page = self.current_page.next();
    }

    pub fn previous_page(&mut self) {
        self.current_page = self.current_page.previous();
    }
}

/// Wrap-around selection move
fn step_selection(state: &mut TableState, len: usize, delta: i64) {
    if len == 0 {
        state.select(None);
        return;
    }
    let current = state.selected().unwrap_or(0) as i64;
    let next = (current + delta).rem_euclid(len as i64) as usize;
    state.select(Some(next));
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run the app
    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res
}

fn run_app<B: ratatui::backend::Backend>(terminal: &mut Terminal<B>, app: &mut App) -> Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            let fast = key.modifiers.contains(KeyModifiers::SHIFT);
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Tab => app.next_page(),
                KeyCode::BackTab => app.previous_page(),
                KeyCode::Enter if app.current_page == Page::Parties => app.open_selected_party()?,
                KeyCode::Char('r') if app.current_page == Page::Parties => app.reload_parties()?,
                KeyCode::Left if app.current_page == Page::Rates => {
                    app.nudge_selected_rate(if fast { -10.0 } else { -1.0 })
                }
                KeyCode::Right if app.current_page == Page::Rates => {
                    app.nudge_selected_rate(if fast { 10.0 } else { 1.0 })
                }
                KeyCode::Char('e') if app.current_page == Page::Rates => app.reset_draft(),
                KeyCode::Char('s') if app.current_page == Page::Rates => app.commit_draft()?,
                KeyCode::Down | KeyCode::Char('j') => app.next(),
                KeyCode::Up | KeyCode::Char('k') => app.previous(),
                _ => {}
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with navigation
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    match app.current_page {
        Page::Parties => render_parties(f, chunks[1], app),
        Page::Rates => render_rates(f, chunks[1], app),
        Page::Settlement => render_settlement(f, chunks[1], app),
    }

    render_status_bar(f, chunks[2], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let mut tab_spans = vec![];
    for (i, page) in [Page::Parties, Page::Rates, Page::Settlement].iter().enumerate() {
        if i > 0 {
            tab_spans.push(Span::raw(" │ "));
        }

        let style = if *page == app.current_page {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };

        tab_spans.push(Span::styled(page.title(), style));
    }

    if let Some(detail) = &app.detail {
        tab_spans.push(Span::raw("  |  "));
        tab_spans.push(Span::styled(
            format!("{} ({})", detail.party.name, detail.party.date),
            Style::default().fg(Color::White),
        ));
        tab_spans.push(Span::raw("  |  "));
        tab_spans.push(Span::styled(
            format!("Total: {}", detail.total_amount()),
            Style::default().fg(Color::Green),
        ));
    }

    let header = Paragraph::new(vec![Line::from(tab_spans)])
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Cyan)));

    f.render_widget(header, area);
}

fn header_row(titles: &[&'static str]) -> Row<'static> {
    let cells = titles.iter().map(|h| {
        Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
    });
    Row::new(cells).style(Style::default().bg(Color::DarkGray)).height(1)
}

fn render_parties(f: &mut Frame, area: Rect, app: &mut App) {
    let rows = app.parties.iter().map(|party| {
        Row::new(vec![
            Cell::from(party.date.clone()),
            Cell::from(truncate(&party.name, 40)),
            Cell::from(party.id.to_string()),
        ])
    });

    let table = Table::new(
        rows,
        [Constraint::Length(12), Constraint::Length(42), Constraint::Length(8)],
    )
    .header(header_row(&["Date", "Party", "ID"]))
    .block(Block::default().borders(Borders::ALL).title(" Parties "))
    .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.party_state);
}

fn render_rates(f: &mut Frame, area: Rect, app: &mut App) {
    if app.detail.is_none() {
        render_hint(f, area, "Select a party on the Parties page and press Enter");
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(3)])
        .split(area);

    let ranks = app.allocator.ranks().to_vec();
    let rows = ranks.iter().map(|rank| {
        let rate = app.draft.get(*rank);
        let bar_len = (rate / 2.0).round().clamp(0.0, 50.0) as usize;
        Row::new(vec![
            Cell::from(format!("Rank {}", rank)),
            Cell::from(format!("{:>6.1}%", rate)),
            Cell::from("█".repeat(bar_len)).style(Style::default().fg(Color::Cyan)),
        ])
    });

    let table = Table::new(
        rows,
        [Constraint::Length(10), Constraint::Length(9), Constraint::Min(10)],
    )
    .header(header_row(&["Rank", "Rate", ""]))
    .block(Block::default().borders(Borders::ALL).title(" Rank Rates (draft) "))
    .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, chunks[0], &mut app.rank_state);

    let total = app.draft.total();
    let total_color = if rank_split::numeric::is_full_allocation(total) {
        Color::Green
    } else {
        Color::Red
    };
    let summary = Paragraph::new(Line::from(vec![
        Span::styled(format!(" Total: {:.1}%", total), Style::default().fg(total_color)),
        Span::raw("  |  "),
        Span::styled(format!("Remaining: {:.1}%", app.remaining), Style::default().fg(Color::White)),
    ]))
    .block(Block::default().borders(Borders::ALL));

    f.render_widget(summary, chunks[1]);
}

fn render_settlement(f: &mut Frame, area: Rect, app: &mut App) {
    let report = match app.detail.as_ref().and_then(|d| d.settlement.as_ref()) {
        Some(report) => report,
        None => {
            render_hint(f, area, "No settlement available for this party");
            return;
        }
    };

    let rows = report.rows.iter().map(|row| {
        let color = if row.balance < 0 { Color::Red } else { Color::Green };
        Row::new(vec![
            Cell::from(truncate(&row.name, 24)),
            Cell::from(row.rank.to_string()),
            Cell::from(row.amount_to_pay.to_string()),
            Cell::from(row.paid_amount.to_string()),
            Cell::from(format!("{:+}", row.balance)).style(Style::default().fg(color)),
        ])
    });

    let title = if report.normalized {
        format!(" Settlement - rates rescaled from {:.1}% ", report.total_rate)
    } else {
        " Settlement ".to_string()
    };

    let table = Table::new(
        rows,
        [
            Constraint::Length(26),
            Constraint::Length(6),
            Constraint::Length(12),
            Constraint::Length(12),
            Constraint::Length(12),
        ],
    )
    .header(header_row(&["Name", "Rank", "To pay", "Paid", "Balance"]))
    .block(Block::default().borders(Borders::ALL).title(title));

    f.render_widget(table, area);
}

fn render_hint(f: &mut Frame, area: Rect, text: &str) {
    let hint = Paragraph::new(text.to_string())
        .style(Style::default().fg(Color::DarkGray))
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(hint, area);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let mut status_spans = vec![];

    if let Some(message) = &app.status {
        status_spans.push(Span::styled(format!(" {} ", message), Style::default().fg(Color::Green)));
        status_spans.push(Span::raw("| "));
    }

    let keys: &[(&str, &str)] = match app.current_page {
        Page::Parties => &[("Enter", "Open"), ("r", "Reload")],
        Page::Rates => &[("←/→", "Adjust"), ("Shift", "x10"), ("e", "Even"), ("s", "Save")],
        Page::Settlement => &[],
    };
    for (key, label) in keys.iter().chain([("Tab", "Page"), ("↑/↓", "Nav")].iter()) {
        status_spans.push(Span::styled(*key, Style::default().fg(Color::Yellow)));
        status_spans.push(Span::raw(format!(" {} | ", label)));
    }
    status_spans.push(Span::styled("q", Style::default().fg(Color::Red)));
    status_spans.push(Span::raw(" Quit"));

    let status_bar = Paragraph::new(vec![Line::from(status_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
