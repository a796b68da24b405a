use serde::{Deserialize, Serialize};

pub const POSE_LANDMARK_COUNT: usize = 33;
pub const FACE_LANDMARK_COUNT: usize = 468;
pub const HAND_LANDMARK_COUNT: usize = 21;

/// A single detected keypoint. Coordinates are normalized to [0, 1] relative
/// to the input image; `z` is depth relative to the subject's hips (pose) or
/// wrist (hands), in the same scale as `x`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub visibility: f32,
}

/// One holistic inference result. A group is `None` when the model's presence
/// score for it fell below the configured threshold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HolisticDetection {
    pub pose: Option<Vec<Landmark>>,
    pub face: Option<Vec<Landmark>>,
    pub left_hand: Option<Vec<Landmark>>,
    pub right_hand: Option<Vec<Landmark>>,
}

impl HolisticDetection {
    pub fn is_empty(&self) -> bool {
        self.pose.is_none()
            && self.face.is_none()
            && self.left_hand.is_none()
            && self.right_hand.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_serializes_absent_groups_as_null() {
        let detection = HolisticDetection {
            pose: Some(vec![Landmark {
                x: 0.5,
                y: 0.25,
                z: -0.1,
                visibility: 0.9,
            }]),
            ..Default::default()
        };

        let json = serde_json::to_value(&detection).unwrap();
        assert_eq!(json["pose"][0]["x"], 0.5);
        assert!(json["face"].is_null());
        assert!(json["left_hand"].is_null());
        assert!(json["right_hand"].is_null());
    }

    #[test]
    fn test_is_empty() {
        assert!(HolisticDetection::default().is_empty());

        let detection = HolisticDetection {
            left_hand: Some(Vec::new()),
            ..Default::default()
        };
        assert!(!detection.is_empty());
    }
}
