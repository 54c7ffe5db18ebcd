use candle_core::{D, Device, IndexOp, Tensor};
use ddrfuzz::inference::{generate, validate_sequence};
use ddrfuzz::model::{ModelConfig, Seq2SeqModel, Variant};
use ddrfuzz::tokenizer::PAD_ID;

fn fresh(variant: Variant, maxlen: usize) -> Seq2SeqModel {
    let config = ModelConfig {
        maxlen,
        ..ModelConfig::tiny(variant)
    };
    Seq2SeqModel::fresh(config, &Device::Cpu).expect("fresh model")
}

fn first_step_probs(model: &Seq2SeqModel, input: &[u32]) -> Vec<f32> {
    let net = model.network();
    let ids = Tensor::new(input, model.device())
        .and_then(|t| t.unsqueeze(0))
        .expect("input tensor");
    let encoded = net.encode(&ids).expect("encode");
    let state = net.initial_state(&encoded).expect("initial state");
    let (probs, _) = net
        .decode_step(model.config().sos_token_id, &encoded, state)
        .expect("decode step");
    probs.to_vec1().expect("probs")
}

fn assert_close(a: &[f32], b: &[f32], tol: f32, what: &str) {
    assert_eq!(a.len(), b.len(), "{what}: length mismatch");
    for (i, (x, y)) in a.iter().zip(b).enumerate() {
        assert!((x - y).abs() <= tol, "{what}: index {i}: {x} vs {y}");
    }
}

#[test]
fn trailing_padding_does_not_change_the_encoding() {
    for variant in Variant::ALL {
        let model = fresh(variant, 12);
        let short = [40u32, 41, 42, 43];
        let padded = [40u32, 41, 42, 43, PAD_ID, PAD_ID, PAD_ID, PAD_ID, PAD_ID];

        let a = first_step_probs(&model, &short);
        let b = first_step_probs(&model, &padded);
        assert_close(&a, &b, 1e-5, variant.as_str());

        let ga = generate(&model, &short).expect("generate short");
        let gb = generate(&model, &padded).expect("generate padded");
        assert_eq!(ga, gb, "{variant}");
    }
}

#[test]
fn generation_terminates_within_maxlen() {
    for variant in Variant::ALL {
        for maxlen in [3, 5, 9] {
            let model = fresh(variant, maxlen);
            let input: Vec<u32> = (0..maxlen).map(|i| 10 + u32::try_from(i).unwrap()).collect();
            let out = generate(&model, &input).expect("generate");
            assert!(!out.tokens.is_empty());
            assert!(out.tokens.len() <= maxlen, "{variant}: {}", out.tokens.len());
            let eos = model.config().eos_token_id;
            let eos_count = out.tokens.iter().filter(|&&t| t == eos).count();
            if out.terminated_by_eos {
                assert_eq!(eos_count, 1);
                assert_eq!(out.tokens.last(), Some(&eos));
            } else {
                assert_eq!(eos_count, 0);
                assert_eq!(out.tokens.len(), maxlen);
            }
            let padded = out.to_padded(maxlen, PAD_ID);
            assert_eq!(padded.len(), maxlen);
            assert!(padded[out.tokens.len()..].iter().all(|&t| t == PAD_ID));
        }
    }
}

#[test]
fn greedy_decoding_is_deterministic() {
    for variant in Variant::ALL {
        let model = fresh(variant, 8);
        let input = [20u32, 21, 22, PAD_ID];
        let first = generate(&model, &input).expect("first run");
        let second = generate(&model, &input).expect("second run");
        assert_eq!(first, second, "{variant}");
    }
}

#[test]
fn teacher_forced_outputs_do_not_look_ahead() {
    let device = Device::Cpu;
    for variant in Variant::ALL {
        let model = fresh(variant, 8);
        let input = Tensor::new(&[[30u32, 31, 32, PAD_ID]], &device).expect("input");
        let a = Tensor::new(&[[1u32, 50, 51, 52, 53]], &device).expect("decoder input a");
        let b = Tensor::new(&[[1u32, 50, 51, 99, 7]], &device).expect("decoder input b");

        let la = model.network().forward(&input, &a, false).expect("forward a");
        let lb = model.network().forward(&input, &b, false).expect("forward b");
        for pos in 0..3 {
            let xa: Vec<f32> = la.i((0, pos)).and_then(|t| t.to_vec1()).expect("logits a");
            let xb: Vec<f32> = lb.i((0, pos)).and_then(|t| t.to_vec1()).expect("logits b");
            assert_close(&xa, &xb, 1e-5, &format!("{variant} position {pos}"));
        }
        let xa: Vec<f32> = la.i((0, 3)).and_then(|t| t.to_vec1()).expect("logits a");
        let xb: Vec<f32> = lb.i((0, 3)).and_then(|t| t.to_vec1()).expect("logits b");
        assert_ne!(xa, xb, "{variant}: position 3 should see its own input");
    }
}

#[test]
fn teacher_forced_and_single_step_agree() {
    let device = Device::Cpu;
    for variant in Variant::ALL {
        let model = fresh(variant, 8);
        let net = model.network();
        let source = [30u32, 31, 32, PAD_ID];
        let prefix = [1u32, 60, 61, 62];

        let input = Tensor::new(&source, &device)
            .and_then(|t| t.unsqueeze(0))
            .expect("input");
        let dec_in = Tensor::new(&prefix, &device)
            .and_then(|t| t.unsqueeze(0))
            .expect("decoder input");
        let logits = net.forward(&input, &dec_in, false).expect("forward");
        let expected = candle_nn::ops::softmax(&logits, D::Minus1).expect("softmax");

        let encoded = net.encode(&input).expect("encode");
        let mut state = net.initial_state(&encoded).expect("initial state");
        for (pos, &token) in prefix.iter().enumerate() {
            let (probs, next) = net.decode_step(token, &encoded, state).expect("step");
            state = next;
            let got: Vec<f32> = probs.to_vec1().expect("probs");
            let want: Vec<f32> = expected.i((0, pos)).and_then(|t| t.to_vec1()).expect("want");
            assert_close(&got, &want, 1e-5, &format!("{variant} position {pos}"));
        }
    }
}

#[test]
fn attention_weights_ignore_padding() {
    let model = fresh(Variant::Attention, 8);
    let net = model.network();
    let ids = Tensor::new(&[[40u32, 41, 42, PAD_ID, PAD_ID, PAD_ID]], &Device::Cpu).expect("ids");
    let encoded = net.encode(&ids).expect("encode");
    let state = net.initial_state(&encoded).expect("initial state");

    let weights: Vec<f32> = net
        .attention_weights(1, &encoded, &state)
        .expect("weights")
        .expect("attention variant has weights")
        .to_vec1()
        .expect("weights vec");
    assert_eq!(weights.len(), 6);
    assert!(weights[3..].iter().all(|&w| w == 0.0));
    let sum: f32 = weights[..3].iter().sum();
    assert!((sum - 1.0).abs() < 1e-5, "sum {sum}");
}

#[test]
fn png_magic_prefix_generates_in_range() {
    for variant in Variant::ALL {
        let model = fresh(variant, 6);
        let input = [0x89u32, 0x50, 0x4E, 0x47, PAD_ID, PAD_ID];
        let out = generate(&model, &input).expect("generate");
        assert!(out.tokens.len() <= 6);
        let vocab = model.config().dec_vocab_size;
        assert!(
            out.tokens
                .iter()
                .all(|&t| usize::try_from(t).unwrap() < vocab)
        );
    }
}

#[test]
fn invalid_sequences_are_rejected_before_decoding() {
    for variant in Variant::ALL {
        let model = fresh(variant, 6);
        let config = model.config();

        let err = generate(&model, &[]).expect_err("empty input");
        assert!(matches!(err, ddrfuzz::Error::InvalidSequence { len: 0, maxlen: 6 }));

        let err = generate(&model, &[10; 7]).expect_err("too long");
        assert!(matches!(err, ddrfuzz::Error::InvalidSequence { len: 7, .. }));

        let err = generate(&model, &[10, 300, 11]).expect_err("out of vocabulary");
        assert!(matches!(
            err,
            ddrfuzz::Error::TokenOutOfRange {
                token: 300,
                position: 1,
                ..
            }
        ));

        assert!(validate_sequence(config, &[10, 11, PAD_ID]).is_ok());
    }
}
