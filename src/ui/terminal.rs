use crossbeam::channel::Receiver;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Gauge, List, ListItem, Paragraph},
    Frame, Terminal,
};
use std::io;
use std::time::{Duration, Instant};

use crate::audio::{EngineHandle, EngineSnapshot, LoopState, OpType, Quantize};

/// Events forwarded from engine callbacks (audio thread) to the UI thread.
#[derive(Debug, Clone)]
pub enum UiEvent {
    Message(String),
    StateChanged,
    Beat,
    Bar,
}

pub struct TerminalUI {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
    handle: EngineHandle,
    events: Receiver<UiEvent>,
    snapshot: EngineSnapshot,
    selected_loop: usize,
    is_running: bool,
    last_draw: Instant,
    status: String,
    beat_flash: Option<Instant>,
    input_device_name: String,
    output_device_name: String,
}

impl TerminalUI {
    pub fn new(
        handle: EngineHandle,
        events: Receiver<UiEvent>,
        input_device_name: &str,
        output_device_name: &str,
    ) -> io::Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let terminal = Terminal::new(CrosstermBackend::new(stdout))?;

        Ok(Self {
            terminal,
            handle,
            events,
            snapshot: EngineSnapshot::default(),
            selected_loop: 0,
            is_running: true,
            last_draw: Instant::now(),
            status: String::from("ready — press ? for help in the footer"),
            beat_flash: None,
            input_device_name: input_device_name.to_string(),
            output_device_name: output_device_name.to_string(),
        })
    }

    pub fn run(&mut self) -> io::Result<()> {
        while self.is_running {
            self.drain_events();

            if event::poll(Duration::from_millis(25))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_key(key);
                    }
                }
            }

            if self.last_draw.elapsed() >= Duration::from_millis(50) {
                self.snapshot = self.handle.snapshot();
                let snapshot = self.snapshot.clone();
                let selected = self.selected_loop;
                let status = self.status.clone();
                let flash = self
                    .beat_flash
                    .map(|t| t.elapsed() < Duration::from_millis(120))
                    .unwrap_or(false);
                let devices = format!("{} → {}", self.input_device_name, self.output_device_name);
                self.terminal
                    .draw(|f| draw(f, &snapshot, selected, &status, flash, &devices))?;
                self.last_draw = Instant::now();
            }
        }

        self.restore()
    }

    fn restore(&mut self) -> io::Result<()> {
        disable_raw_mode()?;
        execute!(self.terminal.backend_mut(), LeaveAlternateScreen)?;
        self.terminal.show_cursor()
    }

    fn drain_events(&mut self) {
        while let Ok(ev) = self.events.try_recv() {
            match ev {
                UiEvent::Message(msg) => self.status = msg,
                UiEvent::StateChanged => {}
                UiEvent::Beat | UiEvent::Bar => self.beat_flash = Some(Instant::now()),
            }
        }
    }

    fn quantize(&self) -> Quantize {
        self.handle.default_quantize()
    }

    fn pending_suffix(&self, q: Quantize) -> &'static str {
        match q {
            Quantize::Free => "",
            Quantize::Beat => " (pending: next beat)",
            Quantize::Bar => " (pending: next bar)",
        }
    }

    fn handle_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') => self.is_running = false,
            KeyCode::Up => {
                self.selected_loop = self.selected_loop.saturating_sub(1);
            }
            KeyCode::Down => {
                if self.selected_loop + 1 < self.handle.max_loops() {
                    self.selected_loop += 1;
                }
            }
            KeyCode::Char(c @ '1'..='8') => {
                let idx = c as usize - '1' as usize;
                if idx < self.handle.max_loops() {
                    self.selected_loop = idx;
                }
            }
            KeyCode::Char('c') => {
                let q = self.quantize();
                self.handle
                    .schedule_capture_loop(Some(self.selected_loop), q, None);
                self.status = format!(
                    "Capture {} bar(s) -> Loop {}{}",
                    self.handle.lookback_bars(),
                    self.selected_loop,
                    self.pending_suffix(q)
                );
            }
            KeyCode::Char('C') => {
                let q = self.quantize();
                if self.handle.schedule_capture_loop(None, q, None) {
                    self.status = format!("Capture -> next empty loop{}", self.pending_suffix(q));
                } else {
                    self.status = String::from("No empty loop slot");
                }
            }
            KeyCode::Char('r') => {
                let q = self.quantize();
                if self.handle.is_recording() {
                    let target = self
                        .handle
                        .recording_loop_idx()
                        .unwrap_or(self.selected_loop);
                    self.handle.schedule_stop_record(target, q);
                    self.status = format!("Stop Record{}", self.pending_suffix(q));
                } else {
                    self.handle.schedule_record(Some(self.selected_loop), q);
                    self.status = format!(
                        "Record -> Loop {}{}",
                        self.selected_loop,
                        self.pending_suffix(q)
                    );
                }
            }
            KeyCode::Char('o') => {
                let q = self.quantize();
                let op = match self.snapshot.loops.get(self.selected_loop) {
                    Some(view) if view.state == LoopState::Recording => OpType::StopOverdub,
                    _ => OpType::StartOverdub,
                };
                self.handle.schedule_op(op, self.selected_loop, q);
                self.status = format!("{}{}", op.description(), self.pending_suffix(q));
            }
            KeyCode::Char('m') => {
                let q = self.quantize();
                self.handle
                    .schedule_op(OpType::ToggleMute, self.selected_loop, q);
                self.status = format!("Toggle Mute{}", self.pending_suffix(q));
            }
            KeyCode::Char('v') => {
                let q = self.quantize();
                self.handle
                    .schedule_op(OpType::Reverse, self.selected_loop, q);
                self.status = format!("Reverse{}", self.pending_suffix(q));
            }
            KeyCode::Char('u') => {
                let q = self.quantize();
                self.handle
                    .schedule_op(OpType::UndoLayer, self.selected_loop, q);
                self.status = format!("Undo Layer{}", self.pending_suffix(q));
            }
            KeyCode::Char('U') => {
                let q = self.quantize();
                self.handle
                    .schedule_op(OpType::RedoLayer, self.selected_loop, q);
                self.status = format!("Redo Layer{}", self.pending_suffix(q));
            }
            KeyCode::Char('x') => {
                let q = self.quantize();
                self.handle
                    .schedule_op(OpType::ClearLoop, self.selected_loop, q);
                self.status = format!("Clear{}", self.pending_suffix(q));
            }
            KeyCode::Char('s') => {
                let speed = self
                    .snapshot
                    .loops
                    .get(self.selected_loop)
                    .map(|l| l.speed)
                    .unwrap_or(1.0);
                self.handle
                    .schedule_set_speed(self.selected_loop, speed * 0.5, Quantize::Free);
            }
            KeyCode::Char('S') => {
                let speed = self
                    .snapshot
                    .loops
                    .get(self.selected_loop)
                    .map(|l| l.speed)
                    .unwrap_or(1.0);
                self.handle
                    .schedule_set_speed(self.selected_loop, speed * 2.0, Quantize::Free);
            }
            KeyCode::Char('f') => {
                let next = match self.handle.default_quantize() {
                    Quantize::Free => Quantize::Beat,
                    Quantize::Beat => Quantize::Bar,
                    Quantize::Bar => Quantize::Free,
                };
                self.handle.set_default_quantize(next);
                self.status = format!("Quantize: {}", next.label());
            }
            KeyCode::Char('[') => {
                let bars = self.handle.lookback_bars().saturating_sub(1);
                let actual = self.handle.set_lookback_bars(bars);
                self.status = format!("Lookback: {} bar(s)", actual);
            }
            KeyCode::Char(']') => {
                let actual = self.handle.set_lookback_bars(self.handle.lookback_bars() + 1);
                self.status = format!("Lookback: {} bar(s)", actual);
            }
            KeyCode::Char('-') => {
                let bpm = (self.snapshot.bpm - 2.0).max(1.0);
                self.handle.set_bpm(bpm);
                self.status = format!("BPM: {:.1}", bpm);
            }
            KeyCode::Char('=') | KeyCode::Char('+') => {
                let bpm = (self.snapshot.bpm + 2.0).min(999.0);
                self.handle.set_bpm(bpm);
                self.status = format!("BPM: {:.1}", bpm);
            }
            KeyCode::Char('k') => {
                let on = !self.handle.click_enabled();
                self.handle.set_click_enabled(on);
                self.status = format!("Click {}", if on { "on" } else { "off" });
            }
            KeyCode::Char('n') => {
                let on = !self.handle.input_monitoring();
                self.handle.set_input_monitoring(on);
                self.status = format!("Monitoring {}", if on { "on" } else { "off" });
            }
            KeyCode::Char('y') => {
                let on = !self.handle.midi_sync_enabled();
                self.handle.set_midi_sync_enabled(on);
                self.status = format!("MIDI sync {}", if on { "on" } else { "off" });
            }
            KeyCode::Char('p') => {
                self.handle.cancel_pending();
                self.status = String::from("All pending ops cancelled");
            }
            _ => {}
        }
    }
}

fn draw(
    f: &mut Frame,
    snapshot: &EngineSnapshot,
    selected: usize,
    status: &str,
    beat_flash: bool,
    devices: &str,
) {
    let loops_height = snapshot.loops.len() as u16 + 2;
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(loops_height),
            Constraint::Length(3),
            Constraint::Min(6),
            Constraint::Length(3),
        ])
        .split(f.area());

    draw_header(f, chunks[0], snapshot, beat_flash, devices);
    draw_loops(f, chunks[1], snapshot, selected);
    draw_channels(f, chunks[2], snapshot);
    draw_activity(f, chunks[3], snapshot);
    draw_footer(f, chunks[4], status);
}

fn draw_header(f: &mut Frame, area: Rect, snapshot: &EngineSnapshot, beat_flash: bool, devices: &str) {
    let pos = snapshot.position;
    let mut flags = Vec::new();
    if snapshot.click_enabled {
        flags.push("CLICK");
    }
    if snapshot.input_monitoring {
        flags.push("MON");
    }
    if snapshot.midi_sync_enabled {
        flags.push("MIDI");
    }
    if snapshot.is_recording {
        flags.push("REC");
    }

    let text = format!(
        " {} {:.1} BPM | bar {} beat {} | Q:{} | lookback {} bar(s) | {} | {}",
        if beat_flash { "●" } else { "○" },
        snapshot.bpm,
        pos.bar + 1,
        pos.beat + 1,
        snapshot.default_quantize.label(),
        snapshot.lookback_bars,
        flags.join(" "),
        devices,
    );

    let header = Paragraph::new(text).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" retroloop "),
    );
    f.render_widget(header, area);
}

fn state_symbol(state: LoopState) -> &'static str {
    match state {
        LoopState::Empty => "·",
        LoopState::Playing => "▶",
        LoopState::Muted => "◼",
        LoopState::Recording => "●",
    }
}

fn draw_loops(f: &mut Frame, area: Rect, snapshot: &EngineSnapshot, selected: usize) {
    let items: Vec<ListItem> = snapshot
        .loops
        .iter()
        .enumerate()
        .map(|(idx, lp)| {
            let line = if lp.state == LoopState::Empty {
                format!(" {} Loop {}  (empty)", state_symbol(lp.state), idx + 1)
            } else {
                let progress = if lp.length_samples > 0 {
                    (lp.play_position as f64 / lp.length_samples as f64 * 100.0) as u32
                } else {
                    0
                };
                format!(
                    " {} Loop {}  {:.1} bars  {}/{} layers  {:.2}x{}  {:>3}%",
                    state_symbol(lp.state),
                    idx + 1,
                    lp.length_in_bars,
                    lp.active_layer_count,
                    lp.layer_count,
                    lp.speed,
                    if lp.reversed { "  rev" } else { "" },
                    progress,
                )
            };

            let style = if idx == selected {
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD)
            } else {
                match lp.state {
                    LoopState::Recording => Style::default().fg(Color::Red),
                    LoopState::Playing => Style::default().fg(Color::Green),
                    LoopState::Muted => Style::default().fg(Color::DarkGray),
                    LoopState::Empty => Style::default(),
                }
            };
            ListItem::new(line).style(style)
        })
        .collect();

    let list = List::new(items).block(Block::default().borders(Borders::ALL).title(" loops "));
    f.render_widget(list, area);
}

fn draw_channels(f: &mut Frame, area: Rect, snapshot: &EngineSnapshot) {
    if snapshot.channels.is_empty() {
        return;
    }
    let constraints: Vec<Constraint> = snapshot
        .channels
        .iter()
        .map(|_| Constraint::Ratio(1, snapshot.channels.len() as u32))
        .collect();
    let areas = Layout::default()
        .direction(Direction::Horizontal)
        .constraints(constraints)
        .split(area);

    for (idx, ch) in snapshot.channels.iter().enumerate() {
        let color = if ch.peak >= 0.9 {
            Color::Red
        } else if ch.live {
            Color::Green
        } else {
            Color::DarkGray
        };
        let gauge = Gauge::default()
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!(" in {} ", idx + 1)),
            )
            .gauge_style(Style::default().fg(color))
            .ratio(ch.peak.clamp(0.0, 1.0) as f64);
        f.render_widget(gauge, areas[idx]);
    }
}

fn draw_activity(f: &mut Frame, area: Rect, snapshot: &EngineSnapshot) {
    let halves = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(area);

    let pending: Vec<ListItem> = snapshot
        .pending_ops
        .iter()
        .map(|op| {
            ListItem::new(format!(
                " Loop {}: {} @ {}",
                op.loop_idx + 1,
                op.op.description(),
                op.execute_sample
            ))
        })
        .collect();
    let pending_list =
        List::new(pending).block(Block::default().borders(Borders::ALL).title(" pending "));
    f.render_widget(pending_list, halves[0]);

    let visible = (halves[1].height as usize).saturating_sub(2);
    let messages: Vec<ListItem> = snapshot
        .messages
        .iter()
        .rev()
        .take(visible.max(1))
        .rev()
        .map(|m| ListItem::new(format!(" {}", m)))
        .collect();
    let message_list =
        List::new(messages).block(Block::default().borders(Borders::ALL).title(" messages "));
    f.render_widget(message_list, halves[1]);
}

fn draw_footer(f: &mut Frame, area: Rect, status: &str) {
    let help = " c capture  r record  o overdub  m mute  v reverse  u/U undo/redo  x clear  \
s/S speed  f quantize  [/] lookback  -/= bpm  k click  n monitor  y midi  p cancel  q quit";
    let text = format!("{}\n{}", status, help);
    let footer = Paragraph::new(text).block(Block::default().borders(Borders::TOP));
    f.render_widget(footer, area);
}
