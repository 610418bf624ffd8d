//! Random human-readable container names.
//!
//! Names have the form `adjective_surname`. Callers retrying after a
//! collision pass the attempt number; any retry past the first appends a
//! random digit to widen the space.

use rand::Rng;

const LEFT: &[&str] = &[
    "admiring", "adoring", "agitated", "amazing", "angry", "awesome", "backstabbing",
    "berserk", "big", "boring", "clever", "cocky", "compassionate", "condescending",
    "cranky", "desperate", "determined", "distracted", "dreamy", "drunk", "ecstatic",
    "elated", "elegant", "evil", "fervent", "focused", "furious", "gigantic", "gloomy",
    "goofy", "grave", "happy", "high", "hopeful", "hungry", "insane", "jolly", "jovial",
    "kickass", "lonely", "loving", "mad", "modest", "naughty", "nauseous", "nostalgic",
    "pedantic", "pensive", "prickly", "reverent", "romantic", "sad", "serene", "sharp",
    "sick", "silly", "sleepy", "small", "stoic", "stupefied", "suspicious", "tender",
    "thirsty", "tiny", "trusting", "zen",
];

const RIGHT: &[&str] = &[
    "albattani", "allen", "almeida", "archimedes", "ardinghelli", "aryabhata", "austin",
    "babbage", "banach", "bardeen", "bartik", "bassi", "bell", "bhabha", "bhaskara",
    "blackwell", "bohr", "booth", "borg", "bose", "boyd", "brahmagupta", "brattain",
    "brown", "carson", "chandrasekhar", "colden", "cori", "cray", "curie", "darwin",
    "davinci", "dijkstra", "dubinsky", "easley", "einstein", "elion", "engelbart",
    "euclid", "euler", "fermat", "fermi", "feynman", "franklin", "galileo", "gates",
    "goldberg", "goldstine", "goldwasser", "golick", "goodall", "hamilton", "hawking",
    "heisenberg", "heyrovsky", "hodgkin", "hoover", "hopper", "hugle", "hypatia",
    "jang", "jennings", "jepsen", "joliot", "jones", "kalam", "kare", "keller",
    "khorana", "kilby", "kirch", "knuth", "kowalevski", "lalande", "lamarr", "leakey",
    "leavitt", "lichterman", "liskov", "lovelace", "lumiere", "mahavira", "mayer",
    "mccarthy", "mcclintock", "mclean", "mcnulty", "meitner", "meninsky", "mestorf",
    "minsky", "mirzakhani", "morse", "murdock", "newton", "nobel", "noether",
    "northcutt", "noyce", "panini", "pare", "pasteur", "payne", "perlman", "pike",
    "poincare", "poitras", "ptolemy", "raman", "ramanujan", "ride", "ritchie",
    "roentgen", "rosalind", "saha", "sammet", "shaw", "shirley", "shockley", "sinoussi",
    "snyder", "spence", "stallman", "stonebraker", "swanson", "swartz", "swirles",
    "tesla", "thompson", "torvalds", "turing", "varahamihira", "visvesvaraya",
    "volhard", "wescoff", "williams", "wilson", "wing", "wozniak", "wright", "yalow",
    "yonath",
];

/// Steve Wozniak is not boring.
const RESERVED: &str = "boring_wozniak";

/// Returns true if `name` matches `[a-zA-Z0-9][a-zA-Z0-9_.-]+`.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    let rest = chars.as_str();
    first.is_ascii_alphanumeric()
        && !rest.is_empty()
        && rest
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Returns a random name. `retry > 0` appends a digit in `0..10`.
#[must_use]
pub fn random_name(retry: u32) -> String {
    let mut rng = rand::rng();
    loop {
        let left = LEFT[rng.random_range(0..LEFT.len())];
        let right = RIGHT[rng.random_range(0..RIGHT.len())];
        let name = format!("{left}_{right}");
        if name == RESERVED {
            continue;
        }
        if retry > 0 {
            return format!("{name}{}", rng.random_range(0..10));
        }
        return name;
    }
}
