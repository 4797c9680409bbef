use opencv::{
    core::{self, Mat, Point, Scalar, Vector},
    imgproc,
    prelude::*,
};

use crate::{
    config::{MarkerSpec, TrackingProfile},
    types::{MarkerAttribute, MarkerObservation, MarkerReading, PixelPosition},
};

#[derive(Debug, Clone)]
pub(crate) struct PuckExtractor {
    markers: Vec<MarkerSpec>,
}

impl PuckExtractor {
    pub fn new(profile: &TrackingProfile) -> Self {
        PuckExtractor {
            markers: profile.markers.clone(),
        }
    }

    fn to_hsv(&self, image: &Mat) -> opencv::Result<Mat> {
        let mut hsv_image = Mat::default();
        imgproc::cvt_color(image, &mut hsv_image, imgproc::COLOR_BGR2HSV, 0)?;
        Ok(hsv_image)
    }

    fn threshold_image(&self, hsv_image: &Mat, marker: &MarkerSpec) -> opencv::Result<Mat> {
        let [h_lo, s_lo, v_lo] = marker.hsv_low;
        let [h_hi, s_hi, v_hi] = marker.hsv_high;

        let mut thresholded_image = Mat::default();
        core::in_range(
            hsv_image,
            &Scalar::new(h_lo as f64, s_lo as f64, v_lo as f64, 0.),
            &Scalar::new(h_hi as f64, s_hi as f64, v_hi as f64, 0.),
            &mut thresholded_image,
        )?;

        Ok(thresholded_image)
    }

    fn largest_contour(&self, mask: &Mat, min_area: f64) -> opencv::Result<Option<Vector<Point>>> {
        let mut contours = Vector::<Vector<Point>>::new();
        imgproc::find_contours(
            mask,
            &mut contours,
            imgproc::RETR_EXTERNAL,
            imgproc::CHAIN_APPROX_SIMPLE,
            Point::new(0, 0),
        )?;

        let mut best: Option<(f64, Vector<Point>)> = None;
        for contour in contours {
            let area = imgproc::contour_area(&contour, false)?;
            if area < min_area {
                continue;
            }
            if best.as_ref().map_or(true, |(best_area, _)| area > *best_area) {
                best = Some((area, contour));
            }
        }

        Ok(best.map(|(_, contour)| contour))
    }

    fn observe(&self, contour: &Vector<Point>) -> opencv::Result<Option<MarkerObservation>> {
        let moments = imgproc::moments(contour, false)?;
        if moments.m00 <= 0. {
            return Ok(None);
        }

        let position = PixelPosition::new(moments.m01 / moments.m00, moments.m10 / moments.m00);
        let angle = 0.5 * (2. * moments.mu11).atan2(moments.mu20 - moments.mu02);
        let outline = contour
            .iter()
            .map(|point| PixelPosition::new(point.y as f64, point.x as f64))
            .collect();

        Ok(Some(
            MarkerObservation::at(position)
                .with_attribute("contour", MarkerAttribute::Contour(outline))
                .with_attribute("angle", MarkerAttribute::Angle(angle))
                .with_attribute("area", MarkerAttribute::Area(moments.m00)),
        ))
    }

    pub fn extract_from(&self, image: &Mat) -> opencv::Result<Vec<MarkerReading>> {
        let hsv_image = self.to_hsv(image)?;

        let mut readings = Vec::new();
        for marker in &self.markers {
            let mask = self.threshold_image(&hsv_image, marker)?;
            let Some(contour) = self.largest_contour(&mask, marker.min_area)? else {
                continue;
            };
            if let Some(observation) = self.observe(&contour)? {
                readings.push(MarkerReading::new(marker.name.clone(), observation));
            }
        }

        Ok(readings)
    }
}
