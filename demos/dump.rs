use mpeg2sys::{DemuxedUnit, Demuxer, ReaderConfig};
use std::env;
use std::fs::File;

fn main() {
    pretty_env_logger::init();
    let args = env::args();
    if args.len() < 2 {
        panic!("No file argument");
    }
    let file_path = args.skip(1).next().unwrap();

    let file = File::open(file_path).expect("unable to open!");
    let mut demuxer = Demuxer::new(file, ReaderConfig::default());
    while let Some(unit) = demuxer.next_unit().expect("parse error") {
        match unit {
            DemuxedUnit::Pat(pat) => println!("{:x?}", pat),
            DemuxedUnit::Pmt(pmt) => println!("{:x?}", pmt),
            DemuxedUnit::Pes { pid, offset, packet } => {
                println!("pid={:x} offset={:?} {:x?}", pid, offset, packet)
            }
        }
    }
}
