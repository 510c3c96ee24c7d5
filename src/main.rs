use anyhow::Result;
use crossbeam::channel;
use retroloop::audio::{AudioStream, EngineCallbacks, EngineSettings, LoopEngine};
use retroloop::config::Config;
use retroloop::midi::open_midi_sink;
use retroloop::ui::{TerminalUI, UiEvent};
use std::path::PathBuf;

fn print_help() {
    println!("retroloop - always-recording terminal live looper");
    println!();
    println!("USAGE:");
    println!("    retroloop [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help          Print this help message");
    println!("    --debug             Verbose logging");
    println!("    --config PATH       Read config from PATH instead of the default");
    println!("    --input NAME        Use a specific input device");
    println!("    --output NAME       Use a specific output device");
    println!("    --midi PORT         Send MIDI clock to PORT");
    println!("    --list-devices      List audio devices and MIDI ports, then exit");
    println!();
    println!("DESCRIPTION:");
    println!("    retroloop keeps a continuous lookback buffer on every input");
    println!("    channel, so the last few bars can be grabbed as a loop at any");
    println!("    moment — no need to press record first. All loop operations can");
    println!("    be quantized to the next beat or bar.");
    println!();
    println!("CONTROLS:");
    println!("    ↑↓ 1-8 Select loop          c      Capture lookback into loop");
    println!("    r      Record / stop record o      Overdub start/stop");
    println!("    m      Mute                 v      Reverse");
    println!("    u / U  Undo / redo layer    x      Clear loop");
    println!("    s / S  Half / double speed  f      Cycle quantize mode");
    println!("    [ ]    Lookback bars        - =    Tempo down/up");
    println!("    k      Metronome click      n      Input monitoring");
    println!("    y      MIDI clock out       p      Cancel pending ops");
    println!("    q      Quit");
}

struct Args {
    debug: bool,
    config_path: Option<PathBuf>,
    input_device: Option<String>,
    output_device: Option<String>,
    midi_port: Option<String>,
    list_devices: bool,
}

fn parse_args() -> Option<Args> {
    let mut args = Args {
        debug: false,
        config_path: None,
        input_device: None,
        output_device: None,
        midi_port: None,
        list_devices: false,
    };

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => return None,
            "--debug" => args.debug = true,
            "--config" => args.config_path = iter.next().map(PathBuf::from),
            "--input" => args.input_device = iter.next(),
            "--output" => args.output_device = iter.next(),
            "--midi" => args.midi_port = iter.next(),
            "--list-devices" => args.list_devices = true,
            other => {
                eprintln!("Unknown option: {}", other);
                return None;
            }
        }
    }
    Some(args)
}

fn main() -> Result<()> {
    let Some(args) = parse_args() else {
        print_help();
        return Ok(());
    };

    let default_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let mut config = Config::load(args.config_path.as_deref())?;
    if args.input_device.is_some() {
        config.input_device = args.input_device.clone();
    }
    if args.output_device.is_some() {
        config.output_device = args.output_device.clone();
    }
    if args.midi_port.is_some() {
        config.midi_port = args.midi_port.clone();
    }

    let stream = AudioStream::new(
        config.input_device.as_deref(),
        config.output_device.as_deref(),
    )?;

    if args.list_devices {
        let (inputs, outputs) = stream.device_names()?;
        println!("Input devices:");
        for name in inputs {
            println!("  {}", name);
        }
        println!("Output devices:");
        for name in outputs {
            println!("  {}", name);
        }
        println!("MIDI output ports:");
        for name in retroloop::midi::output_port_names() {
            println!("  {}", name);
        }
        return Ok(());
    }

    let settings = EngineSettings {
        max_loops: config.max_loops,
        max_lookback_bars: config.max_lookback_bars,
        sample_rate: stream.sample_rate() as f64,
        min_bpm: config.min_bpm,
        bpm: config.bpm,
        beats_per_bar: config.beats_per_bar,
        num_input_channels: config.num_input_channels,
        live_threshold: config.live_threshold,
        live_window_ms: config.live_window_ms,
    };

    let (mut engine, handle) = LoopEngine::new(settings);

    // Apply the runtime-settable knobs from the config
    handle.set_default_quantize(config.parsed_quantize());
    handle.set_lookback_bars(config.lookback_bars);
    handle.set_crossfade_samples(config.crossfade_samples);
    handle.set_latency_compensation(config.latency_compensation_samples);
    handle.set_input_monitoring(config.input_monitoring);
    handle.set_click_enabled(config.click_enabled);
    handle.set_click_volume(config.click_volume);
    handle.set_midi_sync_enabled(config.midi_sync_enabled);

    // Forward engine callbacks to the UI over a channel; the audio thread
    // never blocks on a full queue thanks to try_send.
    let (event_tx, event_rx) = channel::bounded::<UiEvent>(256);
    let msg_tx = event_tx.clone();
    let state_tx = event_tx.clone();
    let beat_tx = event_tx.clone();
    let bar_tx = event_tx;
    engine.set_callbacks(EngineCallbacks {
        on_message: Some(Box::new(move |msg| {
            let _ = msg_tx.try_send(UiEvent::Message(msg.to_string()));
        })),
        on_state_changed: Some(Box::new(move || {
            let _ = state_tx.try_send(UiEvent::StateChanged);
        })),
        on_beat: Some(Box::new(move |_| {
            let _ = beat_tx.try_send(UiEvent::Beat);
        })),
        on_bar: Some(Box::new(move |_| {
            let _ = bar_tx.try_send(UiEvent::Bar);
        })),
    });

    if config.midi_sync_enabled || config.midi_port.is_some() {
        match open_midi_sink(config.midi_port.as_deref()) {
            Ok(sink) => engine.set_midi_sink(sink),
            Err(e) => log::warn!("MIDI clock output unavailable: {}", e),
        }
    }

    let input_name = stream.input_device_name().to_string();
    let output_name = stream.output_device_name().to_string();

    // The output callback drives the engine from here on
    let (_input_stream, _output_stream) = stream.start(engine)?;

    let mut ui = TerminalUI::new(handle, event_rx, &input_name, &output_name)?;
    ui.run()?;

    println!("retroloop stopped.");
    Ok(())
}
