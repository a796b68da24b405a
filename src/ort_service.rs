use crate::{
    config::ModelConfig,
    landmarks::{
        HolisticDetection, Landmark, FACE_LANDMARK_COUNT, HAND_LANDMARK_COUNT, POSE_LANDMARK_COUNT,
    },
    model_service::{LandmarkModel, ModelError},
};
use async_trait::async_trait;
use image::{imageops::FilterType, GenericImageView};
use ndarray::{Array, ArrayD, Ix4};
use ort::{
    execution_providers::CUDAExecutionProvider,
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

/// Input square of the holistic model, shared by all three complexity levels.
const INPUT_SIZE: usize = 256;

/// Raw holistic model outputs: per-group landmark tensors plus one presence
/// score per group, ordered pose, face, left hand, right hand.
struct RawOutputs {
    pose: ArrayD<f32>,
    face: ArrayD<f32>,
    left_hand: ArrayD<f32>,
    right_hand: ArrayD<f32>,
    presence: ArrayD<f32>,
}

fn transform_image(image_data: &[u8]) -> Result<Array<f32, Ix4>, String> {
    let image_reader = image::ImageReader::new(std::io::Cursor::new(image_data))
        .with_guessed_format()
        .map_err(|e| format!("Error reading image: {}", e))?;

    let original_img = image_reader
        .decode()
        .map_err(|e| format!("Error decoding image: {}", e))?;

    let img = original_img.resize_exact(
        INPUT_SIZE as u32,
        INPUT_SIZE as u32,
        FilterType::CatmullRom,
    );

    let mut input = Array::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));
    for pixel in img.pixels() {
        let x = pixel.0 as usize;
        let y = pixel.1 as usize;
        let [r, g, b, _] = pixel.2 .0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    Ok(input)
}

/// Landmark tensor rows are (x, y, z) or (x, y, z, visibility) in input-square
/// pixels; coordinates come out normalized to [0, 1]. Groups without a
/// visibility channel take the group presence score for every point.
fn extract_landmarks(output: &ArrayD<f32>, count: usize, presence: f32) -> Vec<Landmark> {
    let channels = output.shape().last().copied().unwrap_or(3);
    let mut landmarks = Vec::with_capacity(count);

    for i in 0..count {
        let x = output[[0, i, 0]] / INPUT_SIZE as f32;
        let y = output[[0, i, 1]] / INPUT_SIZE as f32;
        let z = output[[0, i, 2]] / INPUT_SIZE as f32;
        let visibility = if channels > 3 {
            output[[0, i, 3]]
        } else {
            presence
        };
        landmarks.push(Landmark {
            x,
            y,
            z,
            visibility,
        });
    }

    landmarks
}

fn postprocess(
    outputs: &RawOutputs,
    min_detection_confidence: f32,
    min_tracking_confidence: f32,
) -> HolisticDetection {
    let presence = |index: usize| outputs.presence[[0, index]];

    // Pose presence gates on the detector threshold; the secondary groups are
    // refined from the pose region and gate on the tracker threshold.
    let pose = (presence(0) >= min_detection_confidence)
        .then(|| extract_landmarks(&outputs.pose, POSE_LANDMARK_COUNT, presence(0)));
    let face = (presence(1) >= min_tracking_confidence)
        .then(|| extract_landmarks(&outputs.face, FACE_LANDMARK_COUNT, presence(1)));
    let left_hand = (presence(2) >= min_tracking_confidence)
        .then(|| extract_landmarks(&outputs.left_hand, HAND_LANDMARK_COUNT, presence(2)));
    let right_hand = (presence(3) >= min_tracking_confidence)
        .then(|| extract_landmarks(&outputs.right_hand, HAND_LANDMARK_COUNT, presence(3)));

    HolisticDetection {
        pose,
        face,
        left_hand,
        right_hand,
    }
}

#[derive(Clone)]
pub struct OrtLandmarkModel {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    min_detection_confidence: f32,
    min_tracking_confidence: f32,
}

impl OrtLandmarkModel {
    pub fn new(model_config: &ModelConfig) -> Result<Self, Box<dyn std::error::Error>> {
        // CUDA is requested but not required: ort falls back to CPU when the
        // provider cannot be registered.
        ort::init()
            .with_execution_providers([CUDAExecutionProvider::default().build()])
            .commit()?;

        let num_instances = model_config.num_instances;
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_config.get_model_path())?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!(
            "Created {} ONNX sessions from {:?}",
            num_instances,
            model_config.get_model_path()
        );

        Ok(Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            min_detection_confidence: model_config.min_detection_confidence,
            min_tracking_confidence: model_config.min_tracking_confidence,
        })
    }

    fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<RawOutputs, ModelError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let session_arc = &self.sessions[index];
        let mut session = session_arc
            .lock()
            .map_err(|e| ModelError::Inference(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("Handling request with session {}", index);
        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| ModelError::Inference(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| ModelError::Inference(format!("inference failed: {}", e)))?;

        let extract = |name: &str| -> Result<ArrayD<f32>, ModelError> {
            let (shape, data) = outputs[name].try_extract_tensor::<f32>().map_err(|e| {
                ModelError::Inference(format!("failed to extract tensor {}: {}", name, e))
            })?;
            ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())
                .map_err(|e| ModelError::Inference(format!("invalid tensor shape {}: {}", name, e)))
        };

        Ok(RawOutputs {
            pose: extract("pose_landmarks")?,
            face: extract("face_landmarks")?,
            left_hand: extract("left_hand_landmarks")?,
            right_hand: extract("right_hand_landmarks")?,
            presence: extract("presence")?,
        })
    }
}

#[async_trait]
impl LandmarkModel for OrtLandmarkModel {
    async fn detect(&self, image_data: Vec<u8>) -> Result<HolisticDetection, ModelError> {
        let input = transform_image(&image_data).map_err(ModelError::ImageDecode)?;

        let outputs = self.run_inference(&input)?;

        let detection = postprocess(
            &outputs,
            self.min_detection_confidence,
            self.min_tracking_confidence,
        );

        tracing::debug!(
            pose = detection.pose.is_some(),
            face = detection.face.is_some(),
            left_hand = detection.left_hand.is_some(),
            right_hand = detection.right_hand.is_some(),
            "Detected landmark groups"
        );

        Ok(detection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(width, height, Rgb([255, 0, 0]));
        let mut image_data: Vec<u8> = Vec::new();
        let mut cursor = Cursor::new(&mut image_data);
        img.write_to(&mut cursor, image::ImageFormat::Png).unwrap();
        image_data
    }

    fn raw_outputs(presence: [f32; 4]) -> RawOutputs {
        let point = |i: usize| (i * 8) as f32;
        RawOutputs {
            pose: Array::from_shape_fn((1, POSE_LANDMARK_COUNT, 4), |(_, i, c)| {
                if c == 3 {
                    0.9
                } else {
                    point(i)
                }
            })
            .into_dyn(),
            face: Array::from_shape_fn((1, FACE_LANDMARK_COUNT, 3), |(_, i, _)| point(i % 32))
                .into_dyn(),
            left_hand: Array::from_shape_fn((1, HAND_LANDMARK_COUNT, 3), |(_, i, _)| point(i))
                .into_dyn(),
            right_hand: Array::from_shape_fn((1, HAND_LANDMARK_COUNT, 3), |(_, i, _)| point(i))
                .into_dyn(),
            presence: Array::from_shape_vec((1, 4), presence.to_vec())
                .unwrap()
                .into_dyn(),
        }
    }

    #[test]
    fn test_transform_image_shape() {
        let input = transform_image(&png_bytes(100, 80)).unwrap();
        assert_eq!(input.shape(), &[1, 3, INPUT_SIZE, INPUT_SIZE]);
        // Red test image: full red channel, empty green and blue.
        assert_eq!(input[[0, 0, 0, 0]], 1.0);
        assert_eq!(input[[0, 1, 0, 0]], 0.0);
    }

    #[test]
    fn test_transform_image_rejects_garbage() {
        assert!(transform_image(&[0x00, 0x01, 0x02]).is_err());
    }

    #[test]
    fn test_postprocess_gates_on_thresholds() {
        let outputs = raw_outputs([0.9, 0.3, 0.6, 0.1]);
        let detection = postprocess(&outputs, 0.5, 0.5);

        assert!(detection.pose.is_some());
        assert!(detection.face.is_none());
        assert!(detection.left_hand.is_some());
        assert!(detection.right_hand.is_none());
        assert_eq!(detection.pose.unwrap().len(), POSE_LANDMARK_COUNT);
        assert_eq!(detection.left_hand.unwrap().len(), HAND_LANDMARK_COUNT);
    }

    #[test]
    fn test_postprocess_below_detection_threshold_is_empty() {
        let outputs = raw_outputs([0.2, 0.2, 0.2, 0.2]);
        let detection = postprocess(&outputs, 0.5, 0.5);
        assert!(detection.is_empty());
    }

    #[test]
    fn test_extract_landmarks_normalizes_coordinates() {
        let outputs = raw_outputs([1.0, 1.0, 1.0, 1.0]);
        let landmarks = extract_landmarks(&outputs.pose, POSE_LANDMARK_COUNT, 1.0);

        // Row 4 holds pixel coordinate 32 in the 256-wide input square.
        assert_eq!(landmarks[4].x, 32.0 / 256.0);
        // Pose rows carry their own visibility channel.
        assert_eq!(landmarks[4].visibility, 0.9);

        let hand = extract_landmarks(&outputs.left_hand, HAND_LANDMARK_COUNT, 0.7);
        assert_eq!(hand[0].visibility, 0.7);
    }
}
