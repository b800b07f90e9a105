//! Default instruction sent with every subject/reference image pair.
//! Image 1 is the subject photo, image 2 the reference character.

pub const DEFAULT_PROMPT: &str = "\
Task: replace the pig in image 1 with the Monkey character from image 2.

Compositing requirements:
- Replace only the subject: the pig itself and any accessories or decorations that belong to it.
- Geometry: the Monkey's scale, position, orientation and perspective match the original pig exactly.
- Lighting: match the key light direction, brightness, colour temperature and contrast of image 1; keep and rebuild contact shadows so the Monkey sits naturally on the ground or objects.
- Texture: no hard cut edges, no white or black fringes, no smearing; the overall look stays consistent with image 1.
- Pose, expression, emotion, clothing, props and role of the Monkey follow those of the pig in image 1.
- Text in the result stays as sharp as in image 1.

Text and marks:
- Any text, logo, sticker or pattern in image 1 that shows or refers to the pig (including the character 猪) is replaced by the Monkey equivalent (such as 猴 or a Monkey graphic), keeping style, stroke weight, colour, material and layout.

Hard limits:
- Do not crop, add borders, or change canvas size or resolution.
- Do not change the background, apply global colour grading, or add anything other than the Monkey and its shadows or reflections.
- Everything else in image 1 stays unchanged.

Output:
- Output only the final composited PNG image, with no explanation or steps.
";

