use image::GrayImage;

use super::backend::Tensor;
use crate::error::SegmentationError;
use crate::geometry::Letterbox;

/// Class index of "person" in the detection head.
pub const PERSON_CLASS_INDEX: usize = 0;
/// Minimum detection confidence; the boundary is inclusive.
pub const SCORE_THRESHOLD: f32 = 0.25;
/// Sigmoid cutoff for mask binarization; the boundary is inclusive.
pub const MASK_THRESHOLD: f32 = 0.5;

/// Decoder for multi-instance models (detection head + prototype masks).
///
/// Each candidate row carries 4 box channels, one score per class and one
/// coefficient per prototype channel; a candidate's mask is the sigmoid of
/// the coefficient-weighted sum of the prototype planes.
pub struct InstanceDecoder {
    pub target_class: usize,
    pub score_threshold: f32,
    pub mask_threshold: f32,
}

impl Default for InstanceDecoder {
    fn default() -> Self {
        Self {
            target_class: PERSON_CLASS_INDEX,
            score_threshold: SCORE_THRESHOLD,
            mask_threshold: MASK_THRESHOLD,
        }
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

impl InstanceDecoder {
    /// Decodes one inference call's outputs into a mask aligned with the
    /// source frame described by `letterbox`.
    pub fn decode(
        &self,
        outputs: &[(String, Tensor)],
        letterbox: &Letterbox,
    ) -> Result<GrayImage, SegmentationError> {
        // The two tensors are identified by rank, never by name: exports
        // rename outputs freely but the detection head is always rank 3
        // and the prototypes rank 4.
        let det = outputs.iter().map(|(_, t)| t).find(|t| t.rank() == 3);
        let proto = outputs.iter().map(|(_, t)| t).find(|t| t.rank() == 4);
        let (det, proto) = match (det, proto) {
            (Some(d), Some(p)) => (d, p),
            _ => {
                return Err(SegmentationError::Decode(
                    "expected a rank-3 detection tensor and a rank-4 prototype tensor".into(),
                ))
            }
        };

        // Channel-major [1, no, N] is the common export; candidates-major
        // [1, N, no] shows up in transposed exports. N is always the
        // larger axis.
        let (mut channels, mut candidates) = (det.shape[1], det.shape[2]);
        let mut transposed = false;
        if channels > candidates {
            std::mem::swap(&mut channels, &mut candidates);
            transposed = true;
        }

        let (proto_c, mask_h, mask_w) = (proto.shape[1], proto.shape[2], proto.shape[3]);
        let plane_len = mask_h * mask_w;
        if plane_len == 0 || proto.data.len() < proto_c * plane_len {
            return Err(SegmentationError::Decode(format!(
                "prototype plane {mask_w}x{mask_h} does not fit tensor of {} values",
                proto.data.len()
            )));
        }

        let num_classes = channels
            .checked_sub(4 + proto_c)
            .filter(|&n| n > 0)
            .ok_or_else(|| {
                SegmentationError::Decode(format!(
                    "detection channels ({channels}) do not cover 4 box values, \
                     class scores and {proto_c} mask coefficients"
                ))
            })?;

        let at = |candidate: usize, channel: usize| -> f32 {
            if transposed {
                det.data[candidate * channels + channel]
            } else {
                det.data[channel * candidates + candidate]
            }
        };

        let mut union = vec![0u8; plane_len];
        let mut acc = vec![0f32; plane_len];
        let mut kept = 0usize;

        for i in 0..candidates {
            let mut best_score = f32::MIN;
            let mut best_class = 0usize;
            for c in 0..num_classes {
                let score = at(i, 4 + c);
                if score > best_score {
                    best_score = score;
                    best_class = c;
                }
            }
            if best_class != self.target_class || best_score < self.score_threshold {
                continue;
            }
            kept += 1;

            acc.fill(0.0);
            for j in 0..proto_c {
                let coeff = at(i, 4 + num_classes + j);
                let base = j * plane_len;
                for p in 0..plane_len {
                    acc[p] += coeff * proto.data[base + p];
                }
            }
            // Binarize and union; already-set pixels are never attenuated.
            for p in 0..plane_len {
                if sigmoid(acc[p]) >= self.mask_threshold {
                    union[p] = 255;
                }
            }
        }

        tracing::debug!("instance decode: {kept}/{candidates} candidates kept");

        if kept == 0 {
            // No person found: fully transparent mask, not an error.
            return Ok(GrayImage::new(letterbox.src_w, letterbox.src_h));
        }

        Ok(letterbox.project_plane(&union, mask_w as u32, mask_h as u32))
    }
}
