use std::{fs::File, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    error::SourceError,
    types::{FrameIndex, MarkerAttribute, MarkerObservation, MarkerReading, PixelPosition},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingRow {
    pub frame: FrameIndex,
    pub timestamp_ms: f64,
    pub marker: String,
    pub row: f64,
    pub col: f64,
    pub angle: Option<f64>,
    pub area: Option<f64>,
}

impl TrackingRow {
    pub fn new(frame: FrameIndex, timestamp: Duration, reading: &MarkerReading) -> Self {
        let observation = &reading.observation;
        TrackingRow {
            frame,
            timestamp_ms: timestamp.as_secs_f64() * 1000.,
            marker: reading.name.clone(),
            row: observation.position.row,
            col: observation.position.col,
            angle: observation.angle(),
            area: observation.area(),
        }
    }

    pub fn to_reading(&self) -> MarkerReading {
        let mut observation = MarkerObservation::at(PixelPosition::new(self.row, self.col));
        if let Some(angle) = self.angle {
            observation = observation.with_attribute("angle", MarkerAttribute::Angle(angle));
        }
        if let Some(area) = self.area {
            observation = observation.with_attribute("area", MarkerAttribute::Area(area));
        }
        MarkerReading::new(self.marker.clone(), observation)
    }
}

pub struct DataLog {
    writer: csv::Writer<File>,
}

impl DataLog {
    pub fn create(path: &Path) -> Result<Self, SourceError> {
        let writer = csv::Writer::from_path(path).map_err(|source| SourceError::DataLog {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(DataLog { writer })
    }

    pub fn record(
        &mut self,
        frame: FrameIndex,
        timestamp: Duration,
        markers: &[MarkerReading],
    ) -> csv::Result<()> {
        for reading in markers {
            self.writer
                .serialize(TrackingRow::new(frame, timestamp, reading))?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

pub fn read_rows(path: &Path) -> csv::Result<Vec<TrackingRow>> {
    let mut reader = csv::Reader::from_path(path)?;
    reader.deserialize().collect()
}
