use chrono::{
    DateTime,
    Local,
    Utc,
};
use color_eyre::eyre::{
    Result,
    eyre,
};
use crossterm::{
    event::{
        self,
        Event,
        KeyCode,
        KeyEventKind,
        KeyModifiers,
    },
    terminal::{
        disable_raw_mode,
        enable_raw_mode,
    },
};
use crypto_rps::{
    engine::SessionSnapshot,
    game::{
        Choice,
        GameOutcome,
    },
    history::HistoryEntry,
    session::SessionState,
};
use ratatui::{
    prelude::*,
    widgets::*,
};
use std::io::stdout;
use tokio::sync::mpsc;

const HELP_LINE: &str = "r/1 rock | p/2 paper | s/3 scissors | c connect | w switch wallet | \
                         d disconnect | h refresh | q/Esc quit";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UserEvent {
    Quit,
    Play(u8),
    Connect,
    SwitchWallet,
    Disconnect,
    Refresh,
    Redraw,
}

pub struct UiState {
    network: String,
    notice: Option<String>,
    terminal: Option<Terminal<CrosstermBackend<std::io::Stdout>>>,
}

impl UiState {
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            notice: None,
            terminal: None,
        }
    }

    /// One-off message shown under the session status until the next key.
    pub fn set_notice(&mut self, notice: impl Into<String>) {
        self.notice = Some(notice.into());
    }
}

pub type InputEventReceiver = mpsc::UnboundedReceiver<std::io::Result<Event>>;

/// Terminal input is read on a dedicated thread so the async loop never
/// blocks on it.
pub fn input_event_stream() -> InputEventReceiver {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        loop {
            let event = event::read();
            let failed = event.is_err();
            if tx.send(event).is_err() || failed {
                break;
            }
        }
    });
    rx
}

pub async fn next_raw_event(input_events: &mut InputEventReceiver) -> Result<Event> {
    match input_events.recv().await {
        Some(event) => Ok(event?),
        None => Err(eyre!("terminal input stream closed")),
    }
}

pub fn interpret_event(state: &mut UiState, event: Event) -> Option<UserEvent> {
    let key = match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => key,
        Event::Resize(..) => return Some(UserEvent::Redraw),
        _ => return None,
    };
    state.notice = None;
    let ev = match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => UserEvent::Quit,
        KeyCode::Char('q') | KeyCode::Esc => UserEvent::Quit,
        KeyCode::Char('r') | KeyCode::Char('1') => UserEvent::Play(Choice::Rock.code()),
        KeyCode::Char('p') | KeyCode::Char('2') => UserEvent::Play(Choice::Paper.code()),
        KeyCode::Char('s') | KeyCode::Char('3') => UserEvent::Play(Choice::Scissors.code()),
        KeyCode::Char('c') => UserEvent::Connect,
        KeyCode::Char('w') => UserEvent::SwitchWallet,
        KeyCode::Char('d') => UserEvent::Disconnect,
        KeyCode::Char('h') => UserEvent::Refresh,
        _ => return None,
    };
    Some(ev)
}

pub fn terminal_enter(state: &mut UiState) -> Result<()> {
    enable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout());
    let terminal = Terminal::new(backend)?;
    state.terminal = Some(terminal);
    Ok(())
}

pub fn terminal_exit() -> Result<()> {
    disable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::LeaveAlternateScreen)?;
    Ok(())
}

pub fn draw(state: &mut UiState, snap: &SessionSnapshot) -> Result<()> {
    if let Some(mut term) = state.terminal.take() {
        term.draw(|f| ui(f, state, snap))?;
        state.terminal = Some(term);
    }
    Ok(())
}

fn ui(f: &mut Frame, state: &UiState, snap: &SessionSnapshot) {
    f.render_widget(Clear, f.area());
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // wallet
            Constraint::Length(5), // choices
            Constraint::Length(4), // status
            Constraint::Min(5),    // history
            Constraint::Length(3), // help
        ])
        .split(f.area());

    draw_wallet_panel(f, chunks[0], state, snap);
    draw_choices(f, chunks[1], snap);
    draw_status(f, chunks[2], state, snap);
    draw_history(f, chunks[3], snap);
    draw_help(f, chunks[4]);
}

fn draw_wallet_panel(f: &mut Frame, area: Rect, state: &UiState, snap: &SessionSnapshot) {
    let account = match (&snap.account, snap.has_wallet) {
        (Some(account), _) => Span::styled(account.short(), Style::default().fg(Color::Cyan)),
        (None, true) => Span::styled("Not connected", Style::default().fg(Color::DarkGray)),
        (None, false) => Span::styled("No wallet", Style::default().fg(Color::Red)),
    };
    let line = Line::from(vec![
        Span::raw("Account: "),
        account,
        Span::raw(format!(" | Network: {}", state.network)),
    ]);
    let widget = Paragraph::new(line).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Crypto Rock Paper Scissors"),
    );
    f.render_widget(widget, area);
}

fn draw_choices(f: &mut Frame, area: Rect, snap: &SessionSnapshot) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Ratio(1, 3); 3])
        .split(area);
    let enabled = snap.account.is_some() && !snap.is_busy();
    let style = if enabled {
        Style::default().fg(Color::White)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    for (choice, rect) in Choice::ALL.iter().zip(cols.iter()) {
        let key = choice.label().chars().next().unwrap_or(' ').to_ascii_lowercase();
        let text = vec![
            Line::from(Span::styled(
                choice_icon(*choice),
                style.add_modifier(Modifier::BOLD),
            )),
            Line::from(Span::styled(format!("[{key}] / [{}]", choice.code()), style)),
        ];
        let widget = Paragraph::new(text)
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL).title(choice.label()))
            .style(style);
        f.render_widget(widget, *rect);
    }
}

fn draw_status(f: &mut Frame, area: Rect, state: &UiState, snap: &SessionSnapshot) {
    let color = match &snap.state {
        SessionState::Failed(_) => Color::Red,
        SessionState::Succeeded(_) => Color::Green,
        SessionState::Idle => Color::Green,
        _ => Color::Yellow,
    };
    let mut lines = vec![Line::from(snap.status.clone())];
    if let Some(notice) = &state.notice {
        lines.push(Line::styled(notice.clone(), Style::default().fg(Color::Magenta)));
    }
    let widget = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("Status"))
        .style(Style::default().fg(color));
    f.render_widget(widget, area);
}

fn draw_history(f: &mut Frame, area: Rect, snap: &SessionSnapshot) {
    let title = if snap.history_stale {
        "Battle History (STALE)"
    } else {
        "Battle History"
    };
    let block = Block::default().borders(Borders::ALL).title(title);
    if snap.history.is_empty() {
        let empty = Paragraph::new(Line::styled(
            "No games yet...",
            Style::default().fg(Color::DarkGray),
        ))
        .block(block);
        f.render_widget(empty, area);
        return;
    }
    let items: Vec<ListItem> = snap
        .history
        .iter()
        .map(history_line)
        .map(ListItem::new)
        .collect();
    f.render_widget(List::new(items).block(block), area);
}

fn draw_help(f: &mut Frame, area: Rect) {
    let help =
        Paragraph::new(HELP_LINE).block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(help, area);
}

fn history_line(entry: &HistoryEntry) -> Line<'static> {
    let result_style = match entry.result {
        GameOutcome::Win => Style::default().fg(Color::Green),
        GameOutcome::Lose => Style::default().fg(Color::Red),
        GameOutcome::Draw => Style::default().fg(Color::Yellow),
        GameOutcome::Other(_) => Style::default().fg(Color::DarkGray),
    };
    Line::from(vec![
        Span::styled(format!("{:<5}", entry.result.to_string()), result_style),
        Span::raw(format!(
            " You: {:<9} House: {:<9} {}",
            choice_name(entry.player_choice, entry.record.player_choice),
            choice_name(entry.house_choice, entry.record.house_choice),
            played_at(entry.played_at),
        )),
    ])
}

fn choice_name(choice: Option<Choice>, raw: u8) -> String {
    match choice {
        Some(choice) => choice.label().to_string(),
        None => format!("?({raw})"),
    }
}

fn played_at(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn choice_icon(choice: Choice) -> &'static str {
    match choice {
        Choice::Rock => "✊",
        Choice::Paper => "✋",
        Choice::Scissors => "✌",
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crossterm::event::KeyEvent;

    fn press(code: KeyCode) -> Event {
        Event::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    #[test]
    fn interpret_event__maps_letters_and_digits_to_choices() {
        let mut state = UiState::new("Local");
        assert_eq!(
            interpret_event(&mut state, press(KeyCode::Char('r'))),
            Some(UserEvent::Play(1))
        );
        assert_eq!(
            interpret_event(&mut state, press(KeyCode::Char('2'))),
            Some(UserEvent::Play(2))
        );
        assert_eq!(
            interpret_event(&mut state, press(KeyCode::Char('s'))),
            Some(UserEvent::Play(3))
        );
    }

    #[test]
    fn interpret_event__keypress_clears_notice() {
        // given
        let mut state = UiState::new("Local");
        state.set_notice("No wallet configured");

        // when
        let ev = interpret_event(&mut state, press(KeyCode::Char('h')));

        // then
        assert_eq!(ev, Some(UserEvent::Refresh));
        assert!(state.notice.is_none());
    }

    #[test]
    fn interpret_event__ignores_unbound_keys() {
        let mut state = UiState::new("Local");
        assert_eq!(interpret_event(&mut state, press(KeyCode::Char('x'))), None);
    }
}
