// Whole-pipeline test over text-format models: Moses-style phrase and
// reordering tables plus an ARPA language model are read into the
// stores, and the resulting model decodes through the facade.

use std::io::Cursor;
use std::sync::atomic::AtomicBool;

use libsmt_core::arpa::read_arpa;
use libsmt_core::rm::read_reordering_table;
use libsmt_core::tm::read_phrase_table;
use libsmt_core::{Config, Model, Translator, Vocabulary};

const PHRASE_TABLE: &str = "\
der ||| the ||| 1.0 1.0 1.0 1.0
hund ||| dog ||| 1.0 1.0 1.0 1.0
der hund ||| the dog ||| 1.0 1.0 0.5 1.0
";

const REORDERING_TABLE: &str = "\
der ||| the ||| 1.0 1.0 1.0 1.0 1.0 1.0
hund ||| dog ||| 1.0 1.0 1.0 1.0 1.0 1.0
UNK ||| UNK ||| 1.0 1.0 1.0 1.0 1.0 1.0
";

const ARPA_LM: &str = "\
\\data\\
ngram 1=5
ngram 2=3

\\1-grams:
-99.0\t<s>\t-0.1
-0.8\tthe\t-0.3
-1.0\tdog\t-0.2
-0.7\t</s>
-10.0\t<unk>

\\2-grams:
-0.2\t<s> the
-0.25\tthe dog
-0.3\tdog </s>

\\end\\
";

fn pipeline_model() -> Model {
    let config = Config {
        dist_lim: 0,
        lm_order: 2,
        ..Config::default()
    };
    let mut vocab = Vocabulary::new();
    let lm = read_arpa(Cursor::new(ARPA_LM), &config, &mut vocab).expect("arpa");
    let tm = read_phrase_table(Cursor::new(PHRASE_TABLE), &config, &mut vocab).expect("tm");
    let rm = read_reordering_table(Cursor::new(REORDERING_TABLE), &config, &mut vocab).expect("rm");
    Model::new(vocab, lm, tm, rm, config)
}

#[test]
fn decodes_through_text_loaded_models() {
    let translator = Translator::new(pipeline_model());
    let stop = AtomicBool::new(false);
    let outcome = translator
        .decode_with_stats(&["der", "hund"], &stop)
        .expect("decode");

    // Word-by-word derivation: TM totals are log10(1) = 0, the LM pays
    // P(the|<s>) + P(dog|the) + P(</s>|dog); the phrasal entry carries
    // the same LM cost plus log10(0.5) and loses.
    assert_eq!(outcome.translation, "the dog");
    let expected = -0.2 + -0.25 + -0.3;
    assert!((outcome.score.unwrap() - expected).abs() < 1e-4);
}

#[test]
fn unknown_words_round_trip_the_pipeline() {
    let translator = Translator::new(pipeline_model());
    let stop = AtomicBool::new(false);
    let outcome = translator
        .decode_with_stats(&["der", "gato"], &stop)
        .expect("decode");
    assert_eq!(outcome.translation, "the <unk>");
}

#[test]
fn sentence_cache_serves_repeats() {
    let translator = Translator::new(pipeline_model());
    let stop = AtomicBool::new(false);
    let first = translator.translate("der hund", &stop).unwrap();
    let second = translator.translate("der  hund ", &stop).unwrap();
    assert_eq!(first, "the dog");
    assert_eq!(first, second);
    let (hits, misses) = translator.cache_stats();
    assert_eq!(misses, 2);
    assert_eq!(hits, 0);
    let third = translator.translate("der hund", &stop).unwrap();
    assert_eq!(third, "the dog");
    assert_eq!(translator.cache_stats().0, 1);
}
