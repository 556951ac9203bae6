use simple_logger::SimpleLogger;
use std::{f64::consts::PI, path::Path, time::Duration};
use steprig::{
	capture::ExternalCapture,
	rig::Rig,
	router::Router,
	sequencer::{SequencerOptions, Step},
};

/// The number of frames in the sweep.
const FRAMES: u32 = 600;

/// Home the four axes of the rig, then sweep them along a spiral and take a
/// photo at every frame.
fn spiral() -> Vec<Step> {
	let (range_x, range_y, range_z, range_a) = (3750.0, 4000.0, 1200.0, 1800.0);
	let mut steps: Vec<Step> = (0..4).map(|axis| Step::Home { axis }).collect();
	for frame in 0..=FRAMES {
		let t = f64::from(frame) / f64::from(FRAMES);
		let phase = t * 2.0 * PI * 3.0;
		steps.push(Step::MoveGroup(vec![
			(0, (t * range_a) as i64 - 100),
			(1, ((phase.sin() + 1.0) * range_x) as i64),
			(2, ((phase.cos() + 1.0) * range_y) as i64),
			(3, (t * range_z) as i64),
		]));
		steps.push(Step::Snapshot { tag: 0 });
	}
	steps
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
	// Enable logging
	SimpleLogger::new().init().unwrap();

	let mut args = std::env::args().skip(1);
	let port_path = args.next().unwrap_or_else(|| "/dev/ttyUSB0".to_string());
	let output_dir = args.next().unwrap_or_else(|| "frames".to_string());

	// Open the port and make sure the controller is listening.
	let router = Router::open_serial(&port_path)?;
	let mut rig = Rig::new(router, 4);
	rig.resync()?;
	println!("firmware {}", rig.version()?);

	rig.poll_until_ready(Duration::from_secs(180))?;

	let mut sequencer = SequencerOptions::new()
		.motion_timeout(Duration::from_secs(60))
		.build(rig.axes(), ExternalCapture::gphoto2());
	let report = sequencer.run(&spiral(), Path::new(&output_dir))?;
	println!("{} steps, {} photos", report.steps, report.snapshots.len());
	Ok(())
}
